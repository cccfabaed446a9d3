use std::collections::VecDeque;

use mirrorlink_osc::OscPacket;

/// Received packets awaiting dispatch, oldest first.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<OscPacket>,
    evicted: u64,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet, honouring `limit` for its address.
    ///
    /// With a limit `k`, the oldest queued packets with exactly the same
    /// address are evicted until fewer than `k` remain, so the queue never
    /// holds more than `k` of them. Returns the number evicted.
    pub fn push(&mut self, packet: OscPacket, limit: Option<usize>) -> usize {
        let mut evicted = 0;

        if let (Some(address), Some(limit)) = (packet.address(), limit) {
            let mut queued = self.count_for(address);
            while queued >= limit.max(1) {
                let Some(index) = self
                    .packets
                    .iter()
                    .position(|queued| queued.address() == Some(address))
                else {
                    break;
                };
                self.packets.remove(index);
                queued -= 1;
                evicted += 1;
            }
        }

        self.evicted += evicted as u64;
        self.packets.push_back(packet);
        evicted
    }

    /// Take every queued packet, leaving the queue empty.
    pub fn drain(&mut self) -> VecDeque<OscPacket> {
        std::mem::take(&mut self.packets)
    }

    /// Number of queued packets addressed exactly to `address`.
    pub fn count_for(&self, address: &str) -> usize {
        self.packets
            .iter()
            .filter(|packet| packet.address() == Some(address))
            .count()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Packets evicted over the lifetime of the queue.
    pub fn total_evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use mirrorlink_osc::{OscBundle, OscMessage};

    use super::*;

    fn numbered(address: &str, n: i32) -> OscPacket {
        let mut msg = OscMessage::new(address);
        msg.write_int(n).unwrap();
        msg.into()
    }

    fn numbers(queue: &mut PacketQueue) -> Vec<(String, i32)> {
        queue
            .drain()
            .into_iter()
            .flat_map(OscPacket::into_messages)
            .map(|msg| {
                let args = msg.arguments().unwrap();
                let value = match args.first() {
                    Some(mirrorlink_osc::OscArgument::Int(v)) => *v,
                    _ => -1,
                };
                (msg.address().to_string(), value)
            })
            .collect()
    }

    #[test]
    fn limit_evicts_oldest_for_same_address() {
        let mut queue = PacketQueue::new();
        for n in 0..3 {
            queue.push(numbered("/Screen", n), Some(2));
        }

        assert_eq!(queue.count_for("/Screen"), 2);
        assert_eq!(queue.total_evicted(), 1);
        assert_eq!(
            numbers(&mut queue),
            vec![("/Screen".into(), 1), ("/Screen".into(), 2)]
        );
    }

    #[test]
    fn eviction_leaves_other_addresses_alone() {
        let mut queue = PacketQueue::new();
        queue.push(numbered("/other", 0), None);
        queue.push(numbered("/Screen", 1), Some(1));
        queue.push(numbered("/other", 2), None);
        let evicted = queue.push(numbered("/Screen", 3), Some(1));

        assert_eq!(evicted, 1);
        assert_eq!(
            numbers(&mut queue),
            vec![
                ("/other".into(), 0),
                ("/other".into(), 2),
                ("/Screen".into(), 3)
            ]
        );
    }

    #[test]
    fn lowered_limit_drains_fully() {
        let mut queue = PacketQueue::new();
        for n in 0..5 {
            queue.push(numbered("/pose", n), None);
        }

        let evicted = queue.push(numbered("/pose", 5), Some(2));
        assert_eq!(evicted, 4);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn bundles_are_never_evicted() {
        let mut queue = PacketQueue::new();
        let mut bundle = OscBundle::new();
        bundle.push(OscMessage::new("/Screen"));
        queue.push(bundle.into(), Some(1));
        queue.push(numbered("/Screen", 1), Some(1));

        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
        assert!(queue.drain().len() == 2 && queue.is_empty());
    }
}
