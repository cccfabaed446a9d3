use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mirrorlink_session::{ImageChannel, InputChannel, SessionConfig, SessionHost, SessionState};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, HostArgs};
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, OutputFormat, SessionEvent};

const IDLE_SLEEP: Duration = Duration::from_millis(2);

pub fn run(args: HostArgs, config: SessionConfig, format: OutputFormat) -> CliResult<i32> {
    if args.fps == 0 || args.width == 0 || args.height == 0 {
        return Err(CliError::new(USAGE, "fps, width and height must be positive"));
    }
    let stop_at = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let mut host = SessionHost::bind(args.addr.as_str(), config)
        .map_err(|err| session_error("bind failed", err))?;
    print_event(
        &SessionEvent::new("listening", "host").with_addr(host.local_addr()),
        format,
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let frame_interval = Duration::from_secs(1) / args.fps;
    let mut last_frame = Instant::now();
    let mut frame_number = 0u32;
    let mut last_state = host.state();
    let mut pattern = Vec::new();

    while running.load(Ordering::SeqCst) {
        if stop_at.is_some_and(|at| Instant::now() >= at) {
            break;
        }

        let state = host
            .tick()
            .map_err(|err| session_error("session failed", err))?;
        if state != last_state {
            report_state(&host, state, format);
            last_state = state;
        }

        if state == SessionState::Connected {
            if last_frame.elapsed() >= frame_interval {
                last_frame = Instant::now();
                frame_number = frame_number.wrapping_add(1);
                fill_test_pattern(&mut pattern, args.width, args.height, frame_number);
                if let Some(image) = host.role_mut().channel_mut::<ImageChannel>() {
                    if let Err(err) = image.send_frame(args.width, args.height, &pattern) {
                        warn!(error = %err, "frame not sent");
                    }
                }
            }
            if let Some(input) = host.role().channel::<InputChannel>() {
                for event in input.drain_events() {
                    print_event(
                        &SessionEvent::new("input", "host").with_detail(format!("{event:?}")),
                        format,
                    );
                }
            }
        }

        std::thread::sleep(IDLE_SLEEP);
    }

    info!(frames = frame_number, "host stopping");
    host.close("host shutting down");
    Ok(SUCCESS)
}

fn report_state(host: &SessionHost, state: SessionState, format: OutputFormat) {
    let mut event = SessionEvent::new("state", "host").with_state(state);
    if let Some(peer) = host.role().connection().and_then(|c| c.peer_addr()) {
        event = event.with_addr(peer);
    }
    if let Some(message) = host.role().error_message() {
        event = event.with_detail(message);
    }
    print_event(&event, format);
}

/// Diagonal RGB gradient that scrolls one pixel per frame.
fn fill_test_pattern(buffer: &mut Vec<u8>, width: u32, height: u32, frame: u32) {
    buffer.clear();
    buffer.reserve(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let shifted = x.wrapping_add(frame) % width;
            buffer.extend_from_slice(&[
                (u64::from(shifted) * 255 / u64::from(width)) as u8,
                (u64::from(y) * 255 / u64::from(height)) as u8,
                (shifted.wrapping_add(y) % 256) as u8,
                255,
            ]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_rgba_and_moves() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        fill_test_pattern(&mut first, 16, 8, 1);
        fill_test_pattern(&mut second, 16, 8, 2);

        assert_eq!(first.len(), 16 * 8 * 4);
        assert!(first.chunks(4).all(|px| px[3] == 255));
        assert_ne!(first, second);
    }
}
