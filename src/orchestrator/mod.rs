//! Run lifecycle: dispatch one request, then relay host events until the
//! verdict decides the exit code.

use crate::model::{OutputEntry, RunRequest, RunResult};
use crate::transport::{EventTag, MessageChannel};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::Write;
use std::time::Duration;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc::UnboundedReceiver;

const CLOCK_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// Event identifier for a request variant.
fn request_tag(request: &RunRequest) -> EventTag {
    match request {
        RunRequest::Test(_) => EventTag::RunTest,
        RunRequest::Bisect(_) => EventTag::RunBisect,
    }
}

/// Send the request to the host: exactly one message, no retry, no ack.
pub fn dispatch(channel: &dyn MessageChannel, request: &RunRequest) -> Result<()> {
    let payload = serde_json::to_value(request).context("serializing run request")?;
    channel
        .send(request_tag(request), payload)
        .context("dispatching run request to execution host")
}

/// Drive one request to completion and return the process exit code.
///
/// Subscriptions are taken before dispatch so nothing the host emits between
/// send and receive can be missed. A dispatch failure drops them unread and
/// listening never begins. `clock_offset` is the wall-clock offset for
/// rendering output timestamps; the caller captures it before the runtime
/// spawns threads, since the platform refuses the lookup afterwards.
pub async fn run(
    channel: &dyn MessageChannel,
    request: &RunRequest,
    clock_offset: UtcOffset,
    timeout: Option<Duration>,
) -> Result<i32> {
    let mut output_rx = channel.subscribe(EventTag::Output);
    let mut done_rx = channel.subscribe(EventTag::Done);

    dispatch(channel, request)?;

    let stdout = std::io::stdout();
    let mut out = std::io::LineWriter::new(stdout.lock());
    listen(&mut out, clock_offset, &mut output_rx, &mut done_rx, timeout).await
}

/// Relay output events to `out` until the verdict (or the deadline, when one
/// was asked for) ends the wait.
async fn listen<W: Write>(
    out: &mut W,
    clock_offset: UtcOffset,
    output_rx: &mut UnboundedReceiver<Value>,
    done_rx: &mut UnboundedReceiver<Value>,
    timeout: Option<Duration>,
) -> Result<i32> {
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

    loop {
        tokio::select! {
            // Drain queued output before acting on a simultaneously ready
            // verdict, so everything the host said gets printed.
            biased;

            Some(payload) = output_rx.recv() => {
                if let Ok(entry) = serde_json::from_value::<OutputEntry>(payload) {
                    let _ = writeln!(out, "{}", format_entry(&entry, clock_offset));
                }
            }
            maybe_verdict = done_rx.recv() => {
                let _ = out.flush();
                match maybe_verdict {
                    Some(payload) => {
                        let result: RunResult = serde_json::from_value(payload)
                            .context("execution host sent an unrecognized run result")?;
                        return Ok(result.exit_code());
                    }
                    // No verdict can arrive anymore; erroring beats hanging.
                    None => bail!("connection to execution host closed before a run verdict"),
                }
            }
            _ = wait_for(deadline) => {
                let _ = out.flush();
                return Ok(RunResult::Invalid.exit_code());
            }
        }
    }
}

async fn wait_for(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

/// Render an output entry the way the host's console does: wall-clock time at
/// the given offset in brackets, then the text verbatim.
fn format_entry(entry: &OutputEntry, clock_offset: UtcOffset) -> String {
    let instant =
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(entry.timestamp) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let clock = instant
        .to_offset(clock_offset)
        .format(CLOCK_FORMAT)
        .unwrap_or_default();
    format!("[{clock}] {}", entry.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BisectRequest, ChannelFilter, FiddleSource, Setup, TestRequest};
    use crate::transport::pair;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_request() -> RunRequest {
        RunRequest::Test(TestRequest {
            setup: Setup::new(
                FiddleSource::FilePath("/work".into()),
                ChannelFilter::default(),
                None,
            ),
        })
    }

    fn bisect_request() -> RunRequest {
        RunRequest::Bisect(BisectRequest {
            bad_version: "11.2.0".into(),
            good_version: "10.0.0".into(),
            setup: Setup::new(
                FiddleSource::FilePath("/work".into()),
                ChannelFilter::default(),
                None,
            ),
        })
    }

    #[tokio::test]
    async fn dispatch_sends_exactly_one_tagged_message() {
        let (client, host) = pair();
        let mut test_rx = host.subscribe(EventTag::RunTest);
        let mut bisect_rx = host.subscribe(EventTag::RunBisect);

        dispatch(&client, &test_request()).unwrap();

        assert_eq!(
            test_rx.recv().await.unwrap(),
            json!({"setup": {"fiddle": {"filePath": "/work"},
                   "hideChannels": [], "showChannels": []}})
        );
        assert!(test_rx.try_recv().is_err());
        assert!(bisect_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bisect_requests_use_the_bisect_tag() {
        let (client, host) = pair();
        let mut bisect_rx = host.subscribe(EventTag::RunBisect);

        dispatch(&client, &bisect_request()).unwrap();

        let payload = bisect_rx.recv().await.unwrap();
        assert_eq!(payload["goodVersion"], "10.0.0");
        assert_eq!(payload["badVersion"], "11.2.0");
    }

    async fn exit_code_for(verdict: &str) -> i32 {
        let (client, host) = pair();
        let mut request_rx = host.subscribe(EventTag::RunBisect);
        let verdict = json!(verdict);

        let driver = tokio::spawn(async move {
            let _ = request_rx.recv().await;
            host.send(EventTag::Done, verdict).unwrap();
        });

        let code = run(&client, &bisect_request(), UtcOffset::UTC, None)
            .await
            .unwrap();
        driver.await.unwrap();
        code
    }

    #[tokio::test]
    async fn verdicts_map_to_exit_codes() {
        assert_eq!(exit_code_for("success").await, 0);
        assert_eq!(exit_code_for("failure").await, 1);
        assert_eq!(exit_code_for("invalid").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_counts_as_invalid() {
        let (client, _host) = pair();
        let code = run(
            &client,
            &bisect_request(),
            UtcOffset::UTC,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn closed_transport_without_a_verdict_is_an_error() {
        let (output_tx, mut output_rx) = mpsc::unbounded_channel::<Value>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Value>();
        drop(output_tx);
        drop(done_tx);

        let mut buf = Vec::new();
        let res = listen(&mut buf, UtcOffset::UTC, &mut output_rx, &mut done_rx, None).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn output_prints_in_arrival_order_before_the_verdict_exit() {
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        output_tx
            .send(json!({"text": "first", "timestamp": 1_000_i64}))
            .unwrap();
        output_tx
            .send(json!({"text": "second", "timestamp": 2_000_i64}))
            .unwrap();
        done_tx.send(json!("success")).unwrap();

        let mut buf = Vec::new();
        let code = listen(&mut buf, UtcOffset::UTC, &mut output_rx, &mut done_rx, None)
            .await
            .unwrap();

        assert_eq!(code, 0);
        let printed = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"), "got {:?}", lines[0]);
        assert!(lines[1].ends_with("] second"), "got {:?}", lines[1]);
    }

    #[tokio::test]
    async fn malformed_output_entries_are_skipped() {
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        output_tx.send(json!({"nope": true})).unwrap();
        output_tx
            .send(json!({"text": "kept", "timestamp": 1_000_i64}))
            .unwrap();
        done_tx.send(json!("failure")).unwrap();

        let mut buf = Vec::new();
        let code = listen(&mut buf, UtcOffset::UTC, &mut output_rx, &mut done_rx, None)
            .await
            .unwrap();

        assert_eq!(code, 1);
        let printed = String::from_utf8(buf).unwrap();
        assert_eq!(printed.lines().count(), 1);
        assert!(printed.trim_end().ends_with("] kept"));
    }

    #[test]
    fn format_entry_renders_the_clock_at_the_given_offset() {
        let entry = OutputEntry {
            text: "asieoniezi".into(),
            timestamp: 1_735_689_600_000, // 2025-01-01 00:00:00 UTC
        };
        assert_eq!(
            format_entry(&entry, UtcOffset::UTC),
            "[00:00:00] asieoniezi"
        );
        assert_eq!(
            format_entry(&entry, time::macros::offset!(+5:30)),
            "[05:30:00] asieoniezi"
        );
    }
}
