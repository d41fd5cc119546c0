//! Session supervisor: drives one bridge session through dial, connect,
//! authenticate, online, and teardown, restarting the whole cycle with
//! exponential backoff on failure — the same crash-restart shape as a
//! process supervisor, applied here to a TCP dial instead of a child
//! process.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::device::{self, Device, DeviceSpec, ReadOutcome};
use crate::error::{is_retryable, BridgeError, Result};
use crate::handshake;
use crate::modem::{ControlEvent, DialOutcome, Interpreter};
use crate::pump::{self, PumpExit};

/// Coarse session state, used for log labelling at each transition. Control
/// flow itself is driven by the nested dial/online loops below, not by a
/// match over this enum, but every state named here is reached and logged
/// somewhere in `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    WaitingForDial,
    Connecting,
    Authenticating,
    Online,
    TearingDown,
    Failed,
}

/// Outcome of a bounded command-mode read loop (used both for the initial
/// "waiting for ATD" phase and for the `+++` escape's `OnlineCommand` phase).
enum CommandLoopExit {
    Dial,
    Hangup,
    ReturnOnline,
    Cancelled,
    DeviceFailed(BridgeError),
}

/// Outcome of a bounded series of connect/handshake attempts.
enum DialAttempt {
    Connected(TcpStream),
    /// Every attempt in the bounded retry budget failed; carries the last
    /// error seen, which the caller surfaces (non-emulating mode) or
    /// reports as a local result code (AT emulation) before redialling.
    GaveUp(BridgeError),
    Cancelled,
}

/// Run the supervisor loop until `cancel` is signalled or a terminal error
/// is reached.
///
/// The device is opened once; a failure there (`DeviceUnavailable`,
/// `DeviceMisconfigured`) is terminal immediately, no retry. Connect/
/// handshake failures are retried internally with jittered backoff up to
/// `session.connection_retries`. Once that budget is exhausted: with AT
/// emulation on, the failure becomes a local result code and the loop waits
/// for the next `ATD`; without it, there's no terminal to report to, so the
/// failure is returned as `Err` and the process exits with the matching
/// code (§6, §8 scenario 4). A shutdown signal always surfaces as
/// `Err(BridgeError::Cancelled)` (exit code 130).
pub async fn run(config: Config, mut cancel: watch::Receiver<bool>) -> Result<()> {
    let spec = DeviceSpec::parse(&config.device.spec)?;
    let inactivity_timeout = (config.session.inactivity_timeout_secs > 0)
        .then(|| Duration::from_secs(config.session.inactivity_timeout_secs));

    if *cancel.borrow() {
        return Err(BridgeError::Cancelled);
    }

    debug!("supervisor: state -> {:?}", SessionState::Idle);
    info!("supervisor: opening device {}", config.device.spec);
    let device = device::open(&spec, config.device.baud_rate)
        .await
        .map_err(|e| {
            error!("supervisor: device {} unavailable: {e}", config.device.spec);
            e
        })?;

    let mut interpreter = config
        .modem
        .emulate
        .then(|| Interpreter::new(config.modem.identity.clone(), config.modem.connect_speed_bps));

    'dial: loop {
        if *cancel.borrow() {
            return Err(BridgeError::Cancelled);
        }

        if let Some(interp) = interpreter.as_mut() {
            debug!("supervisor: state -> {:?}", SessionState::WaitingForDial);
            match run_command_loop(&device, interp, &mut cancel).await {
                CommandLoopExit::Dial => {}
                CommandLoopExit::Cancelled => return Err(BridgeError::Cancelled),
                CommandLoopExit::DeviceFailed(e) => return Err(e),
                // The interpreter only emits Hangup/ReturnOnline from its
                // OnlineCommand mode, which can't be reached here.
                CommandLoopExit::Hangup | CommandLoopExit::ReturnOnline => continue 'dial,
            }
        }

        debug!("supervisor: state -> {:?}", SessionState::Connecting);
        let mut stream = match attempt_dial(&config, &device, interpreter.as_mut(), &mut cancel).await {
            DialAttempt::Connected(s) => s,
            DialAttempt::Cancelled => return Err(BridgeError::Cancelled),
            DialAttempt::GaveUp(e) => {
                debug!("supervisor: state -> {:?}", SessionState::Failed);
                if interpreter.is_none() {
                    // No AT layer to report to and no retry budget left:
                    // this is scenario 4 of the retry policy, terminal.
                    error!("supervisor: dial retry budget exhausted: {e}");
                    return Err(e);
                }
                continue 'dial;
            }
        };

        debug!("supervisor: state -> {:?}", SessionState::Online);
        let started = Instant::now();
        let mut online = true;

        while online {
            match pump::run(
                &device,
                &mut stream,
                inactivity_timeout,
                interpreter.as_mut(),
                &mut cancel,
            )
            .await
            {
                Ok(PumpExit::Cancelled) => return Err(BridgeError::Cancelled),
                Ok(PumpExit::Escape) => {
                    let Some(interp) = interpreter.as_mut() else {
                        // Escape detection only runs when an interpreter
                        // is present, so this arm is unreachable without one.
                        online = false;
                        continue;
                    };
                    match run_command_loop(&device, interp, &mut cancel).await {
                        CommandLoopExit::ReturnOnline => continue,
                        CommandLoopExit::Hangup => online = false,
                        CommandLoopExit::Cancelled => return Err(BridgeError::Cancelled),
                        CommandLoopExit::DeviceFailed(e) => return Err(e),
                        // A redundant ATD while already online hangs up
                        // the current call rather than dialling a second one.
                        CommandLoopExit::Dial => online = false,
                    }
                }
                Ok(PumpExit::SocketEof) | Ok(PumpExit::DeviceEof) | Ok(PumpExit::InactivityTimeout) => {
                    online = false;
                }
                Err(e) => {
                    warn!("supervisor: pump error: {e}");
                    online = false;
                }
            }
        }

        debug!("supervisor: state -> {:?}", SessionState::TearingDown);
        if let Some(interp) = interpreter.as_mut() {
            let frame = interp.on_carrier_lost();
            write_all_to_device(&device, &frame).await;
        }
        drop(stream);

        let uptime = started.elapsed();
        info!("supervisor: session ended after {:.1}s", uptime.as_secs_f64());
        continue 'dial;
    }
}

/// Read device bytes and feed them to the AT interpreter until it reports a
/// control event or the device/cancellation ends the loop early.
async fn run_command_loop(
    device: &Device,
    interp: &mut Interpreter,
    cancel: &mut watch::Receiver<bool>,
) -> CommandLoopExit {
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return CommandLoopExit::Cancelled;
                }
            }

            result = device.read(&mut buf) => {
                match result {
                    Ok(ReadOutcome::Eof) => {
                        let e = BridgeError::DeviceIoError(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "device closed while awaiting a command",
                        ));
                        error!("supervisor: {e}");
                        return CommandLoopExit::DeviceFailed(e);
                    }
                    Ok(ReadOutcome::Data(n)) => {
                        let (reply, event) = interp.feed_command_bytes(&buf[..n]);
                        write_all_to_device(device, &reply).await;
                        match event {
                            Some(ControlEvent::Dial) => return CommandLoopExit::Dial,
                            Some(ControlEvent::Hangup) => return CommandLoopExit::Hangup,
                            Some(ControlEvent::ReturnOnline) => return CommandLoopExit::ReturnOnline,
                            Some(ControlEvent::Escape) | None => {}
                        }
                    }
                    Err(e) => {
                        error!("supervisor: device read error in command mode: {e}");
                        return CommandLoopExit::DeviceFailed(e);
                    }
                }
            }
        }
    }
}

/// Attempt to connect and authenticate to the remote, retrying up to
/// `session.connection_retries` times with jittered exponential backoff
/// between attempts. Reports exactly one dial result back to the AT
/// interpreter (if present): `CONNECT` on success, or the mapped failure
/// code once every attempt has been exhausted.
async fn attempt_dial(
    config: &Config,
    device: &Device,
    mut interpreter: Option<&mut Interpreter>,
    cancel: &mut watch::Receiver<bool>,
) -> DialAttempt {
    let mut backoff = 1u64;
    let mut last_err: Option<BridgeError> = None;
    let retries = config.session.connection_retries.max(1);

    for attempt in 1..=retries {
        match connect_and_authenticate(config).await {
            Ok(stream) => {
                if let Some(interp) = interpreter.as_deref_mut() {
                    let frame = interp.on_dial_result(DialOutcome::Connected);
                    write_all_to_device(device, &frame).await;
                }
                return DialAttempt::Connected(stream);
            }
            Err(e) => {
                warn!("supervisor: dial attempt {attempt}/{retries} failed: {e}");
                let retryable = is_retryable(&e);
                last_err = Some(e);
                if !retryable || attempt == retries {
                    break;
                }
                if wait_or_cancel(
                    backoff_with_jitter(backoff, config.supervisor.max_backoff_secs),
                    cancel,
                )
                .await
                {
                    return DialAttempt::Cancelled;
                }
                backoff = (backoff * 2).min(config.supervisor.max_backoff_secs);
            }
        }
    }

    // The loop runs at least once (`retries` is clamped to >= 1) and only
    // breaks after recording an error, so this is always populated.
    let last_err = last_err.expect("at least one dial attempt records an error");
    if let Some(interp) = interpreter.as_deref_mut() {
        let frame = interp.on_dial_result(dial_outcome_for(&last_err));
        write_all_to_device(device, &frame).await;
    }
    DialAttempt::GaveUp(last_err)
}

/// Connect to the configured remote and run the login handshake. A TCP
/// connect failure (refused, timed out, unreachable) is reported as `NO
/// ANSWER` by the caller; a handshake failure after a successful connect is
/// reported as `NO CARRIER`, since a carrier was briefly established then
/// lost. There is no single-remote analogue of a busy signal, so `BUSY` is
/// never produced by this path.
async fn connect_and_authenticate(config: &Config) -> Result<TcpStream> {
    debug!("supervisor: state -> {:?}", SessionState::Connecting);
    let addr = format!("{}:{}", config.remote.host, config.remote.port);
    let mut stream =
        TcpStream::connect(&addr)
            .await
            .map_err(|e| BridgeError::RemoteUnreachable {
                host: config.remote.host.clone(),
                port: config.remote.port,
                reason: e.to_string(),
            })?;
    stream.set_nodelay(true).ok();

    debug!("supervisor: state -> {:?}", SessionState::Authenticating);
    handshake::run(&mut stream, &config.auth.username, &config.auth.password).await?;
    Ok(stream)
}

fn dial_outcome_for(err: &BridgeError) -> DialOutcome {
    match err {
        BridgeError::RemoteUnreachable { .. } => DialOutcome::NoAnswer,
        _ => DialOutcome::NoCarrier,
    }
}

/// Write `bytes` to the device in full, logging (not failing) on error —
/// result-code framing is best-effort; a write failure here means the
/// device is already in trouble and will surface on the next real I/O.
async fn write_all_to_device(device: &Device, mut buf: &[u8]) {
    while !buf.is_empty() {
        match device.write(buf).await {
            Ok(0) => break,
            Ok(n) => buf = &buf[n..],
            Err(e) => {
                warn!("supervisor: failed to write to device: {e}");
                break;
            }
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `true` if
/// cancellation won the race.
async fn wait_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        result = cancel.changed() => result.is_err() || *cancel.borrow(),
    }
}

/// Exponential backoff with a cap and ±20% jitter, the same shape as the
/// process-restart backoff this is grounded on.
fn backoff_with_jitter(base_secs: u64, cap_secs: u64) -> Duration {
    let base = base_secs.min(cap_secs.max(1)) as f64;
    let jitter = rand::rng().random_range(-0.2..=0.2);
    let secs = (base * (1.0 + jitter)).max(0.1);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_with_jitter_stays_within_twenty_percent() {
        for base in [1, 2, 4, 8, 16, 30] {
            for _ in 0..50 {
                let d = backoff_with_jitter(base, 30);
                let secs = d.as_secs_f64();
                assert!(secs >= base as f64 * 0.8 - 0.01);
                assert!(secs <= base as f64 * 1.2 + 0.01);
            }
        }
    }

    #[test]
    fn backoff_with_jitter_respects_cap() {
        for _ in 0..50 {
            let d = backoff_with_jitter(100, 30);
            assert!(d.as_secs_f64() <= 30.0 * 1.2 + 0.01);
        }
    }

    #[test]
    fn dial_outcome_maps_remote_unreachable_to_no_answer() {
        let err = BridgeError::RemoteUnreachable {
            host: "h".to_string(),
            port: 1,
            reason: "refused".to_string(),
        };
        assert_eq!(dial_outcome_for(&err), DialOutcome::NoAnswer);
    }

    #[test]
    fn dial_outcome_maps_handshake_rejected_to_no_carrier() {
        let err = BridgeError::HandshakeRejected("bad banner".to_string());
        assert_eq!(dial_outcome_for(&err), DialOutcome::NoCarrier);
    }

    #[tokio::test]
    async fn attempt_dial_gives_up_with_unreachable_remote() {
        let config = Config {
            remote: crate::config::RemoteConfig {
                host: "127.0.0.1".to_string(),
                port: 1, // nothing listens on a privileged port in test sandboxes
            },
            auth: crate::config::AuthConfig {
                username: "u".to_string(),
                password: "p".to_string(),
            },
            device: crate::config::DeviceConfig::default(),
            modem: crate::config::ModemConfig::default(),
            session: crate::config::SessionConfig {
                inactivity_timeout_secs: 0,
                connection_retries: 1,
            },
            logging: crate::config::LoggingConfig::default(),
            supervisor: crate::config::SupervisorConfig::default(),
        };

        let result = connect_and_authenticate(&config).await;
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::RemoteUnreachable { .. }));
        assert_eq!(dial_outcome_for(&err), DialOutcome::NoAnswer);
    }
}
