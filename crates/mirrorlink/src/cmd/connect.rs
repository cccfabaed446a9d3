use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mirrorlink_session::{ImageChannel, SessionClient, SessionConfig, SessionState};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, ConnectArgs};
use crate::exit::{session_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT};
use crate::output::{print_event, print_frame, OutputFormat, SessionEvent};

const IDLE_SLEEP: Duration = Duration::from_millis(2);

pub fn run(args: ConnectArgs, config: SessionConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let started = Instant::now();

    let mut client = SessionClient::new(args.addr.clone(), config)
        .map_err(|err| session_error("invalid session", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut last_state = client.state();
    let mut last_index = None;
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                client.close("timed out");
                return Err(CliError::new(
                    TIMEOUT,
                    format!(
                        "received {printed} frames from {} within {timeout:?}",
                        args.addr
                    ),
                ));
            }
        }

        let state = client
            .tick()
            .map_err(|err| session_error("session failed", err))?;
        if state != last_state {
            let mut event = SessionEvent::new("state", "client")
                .with_addr(&args.addr)
                .with_state(state);
            if let Some(message) = client.role().error_message() {
                event = event.with_detail(message);
            }
            print_event(&event, format);
            last_state = state;
        }

        if client.role().has_error() {
            let message = client
                .role()
                .error_message()
                .unwrap_or("session failed")
                .to_string();
            return Err(CliError::new(DATA_INVALID, message));
        }

        if state == SessionState::Connected {
            let frame = client
                .role()
                .channel::<ImageChannel>()
                .and_then(|image| image.visible_frame());
            if let Some(frame) = frame {
                if last_index != Some(frame.index) {
                    last_index = Some(frame.index);
                    print_frame(frame, &args.addr, format);
                    printed = printed.saturating_add(1);

                    if args.count.is_some_and(|count| printed >= count) {
                        info!(frames = printed, "frame count reached");
                        client.close("done");
                        return Ok(SUCCESS);
                    }
                }
            }
        }

        std::thread::sleep(IDLE_SLEEP);
    }

    client.close("interrupted");
    Ok(SUCCESS)
}
