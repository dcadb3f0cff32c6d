use super::{Envelope, EventTag, MessageChannel, Subscriptions};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// NDJSON channel to the execution host over a Unix domain socket.
///
/// One envelope per line in both directions. A reader task routes inbound
/// envelopes to per-tag subscribers; a writer task owns the outbound half and
/// drains an unbounded queue, so `send` never blocks the caller.
pub struct SocketChannel {
    outbound: UnboundedSender<Envelope>,
    subscriptions: Subscriptions,
}

impl SocketChannel {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connecting to execution host at {}", path.display()))?;
        let (read_half, mut write_half) = stream.into_split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Ok(mut line) = serde_json::to_vec(&envelope) {
                    line.push(b'\n');
                    if write_half.write_all(&line).await.is_err() {
                        break;
                    }
                }
            }
        });

        let subscriptions = Subscriptions::default();
        let inbound = subscriptions.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // lines that are not envelopes are skipped, not fatal
                if let Ok(envelope) = serde_json::from_str::<Envelope>(&line) {
                    inbound.deliver(envelope.event, &envelope.payload);
                }
            }
        });

        Ok(Self {
            outbound,
            subscriptions,
        })
    }
}

impl MessageChannel for SocketChannel {
    fn send(&self, tag: EventTag, payload: Value) -> Result<()> {
        self.outbound
            .send(Envelope {
                event: tag,
                payload,
            })
            .map_err(|_| anyhow!("connection to execution host closed"))
    }

    fn subscribe(&self, tag: EventTag) -> UnboundedReceiver<Value> {
        self.subscriptions.subscribe(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    async fn connected_pair(dir: &Path) -> (SocketChannel, UnixStream) {
        let path = dir.join("host.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (channel, accepted) =
            tokio::join!(SocketChannel::connect(&path), listener.accept());
        (channel.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn outbound_envelopes_arrive_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, mut host) = connected_pair(dir.path()).await;

        channel
            .send(EventTag::RunTest, json!({"setup": {}}))
            .unwrap();

        let mut buf = vec![0u8; 256];
        let n = host.read(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        assert_eq!(
            line,
            "{\"event\":\"run test\",\"payload\":{\"setup\":{}}}\n"
        );
    }

    #[tokio::test]
    async fn inbound_lines_reach_matching_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, mut host) = connected_pair(dir.path()).await;

        let mut output_rx = channel.subscribe(EventTag::Output);
        let mut done_rx = channel.subscribe(EventTag::Done);

        host.write_all(
            b"{\"event\":\"output\",\"payload\":{\"text\":\"hi\",\"timestamp\":5}}\n\
              not json at all\n\
              {\"event\":\"done\",\"payload\":\"success\"}\n",
        )
        .await
        .unwrap();

        assert_eq!(output_rx.recv().await.unwrap()["text"], "hi");
        assert_eq!(done_rx.recv().await.unwrap(), json!("success"));
    }

    #[tokio::test]
    async fn connect_fails_without_a_listening_host() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nobody.sock");
        assert!(SocketChannel::connect(&missing).await.is_err());
    }
}
