//! Per-connection session protocol.
//!
//! One task per connection drives this loop; messages on a connection are
//! handled strictly in arrival order because the loop awaits each reply
//! before pulling the next frame. The CPU-bound frame pipeline (image decode,
//! hand detection, normalization, assembly) runs on the blocking pool behind
//! a semaphore so it never stalls other connections; the store query is an
//! async call. If the connection dies with a frame in flight the task is
//! dropped and the worker's result is discarded when it completes.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::fingerprint::{assemble, normalize, AssembleError, AssembledFingerprint, MatchMode};
use crate::hand::{HandDetector, Handedness};
use crate::protocol::{self, ClientMessage, ServerReply, StatusReply, VerdictReply};
use crate::store::SimilarityStore;

use super::evaluate::{MatchEvaluator, MatchVerdict};
use super::registry::Registry;
use super::select::TargetSelector;

/// Shared dependencies of every session
pub struct GameContext<D, S> {
    detector: Arc<Mutex<D>>,
    mode: MatchMode,
    evaluator: MatchEvaluator<S>,
    selector: TargetSelector<S>,
    detect_slots: Arc<Semaphore>,
}

impl<D, S> GameContext<D, S>
where
    D: HandDetector,
    S: SimilarityStore,
{
    pub fn new(detector: D, store: Arc<S>, matching: &MatchingConfig, detect_slots: usize) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            mode: matching.mode,
            evaluator: MatchEvaluator::new(Arc::clone(&store), matching.threshold),
            selector: TargetSelector::new(store),
            detect_slots: Arc::new(Semaphore::new(detect_slots)),
        }
    }
}

/// Drive one player connection to completion.
///
/// The session is registered on entry and removed on every exit path.
pub async fn run_session<T, D, S>(
    io: T,
    ctx: Arc<GameContext<D, S>>,
    registry: Arc<Registry>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    D: HandDetector + 'static,
    S: SimilarityStore + 'static,
{
    let mut stream = protocol::framed(io);
    let (conn_id, session) = registry.insert();
    info!(
        "player {} connected ({} active)",
        session.player_id,
        registry.len()
    );

    let result = session_loop(&mut stream, conn_id, &session.player_id, &ctx, &registry).await;

    let removed = registry.remove(conn_id);
    let player_id = removed.map_or(session.player_id, |s| s.player_id);
    info!(
        "player {} disconnected ({} active)",
        player_id,
        registry.len()
    );
    result
}

async fn session_loop<T, D, S>(
    stream: &mut Framed<T, LengthDelimitedCodec>,
    conn_id: u64,
    player_id: &str,
    ctx: &GameContext<D, S>,
    registry: &Registry,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    D: HandDetector + 'static,
    S: SimilarityStore,
{
    let banner = ServerReply::Status(StatusReply::connected(
        player_id,
        format!("Connection established. Player {player_id}. Dominance: RIGHT"),
    ));
    protocol::send_message(stream, &banner).await?;

    while let Some(frame) = stream.next().await {
        let frame = frame?;
        if let Some(reply) = handle_frame(&frame, conn_id, ctx, registry).await {
            protocol::send_message(stream, &reply).await?;
        }
    }
    Ok(())
}

/// Decode and dispatch one inbound frame, producing at most one reply.
///
/// Nothing in here ends the session: malformed input, geometry failures, and
/// store trouble all turn into structured replies.
async fn handle_frame<D, S>(
    frame: &[u8],
    conn_id: u64,
    ctx: &GameContext<D, S>,
    registry: &Registry,
) -> Option<ServerReply>
where
    D: HandDetector + 'static,
    S: SimilarityStore,
{
    let envelope = match protocol::decode_client(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            let session = registry.get(conn_id)?;
            return Some(ServerReply::Status(StatusReply::error(
                &session.player_id,
                format!("Invalid message: {e}"),
            )));
        }
    };

    // Any message may rename the client-visible player id
    if let Some(new_id) = envelope.player_id {
        registry.update(conn_id, |s| s.player_id = new_id);
    }
    let session = registry.get(conn_id)?;
    let player_id = session.player_id.as_str();

    match envelope.message {
        ClientMessage::SetTarget { sign } => {
            let target = sign.to_uppercase();
            registry.update(conn_id, |s| s.target = Some(target.clone()));
            info!("player {player_id} target set to {target}");
            Some(ServerReply::Status(StatusReply::target_set(
                player_id, &target,
            )))
        }

        ClientMessage::AssignTarget { difficulty } => {
            let tier = difficulty.trim().to_uppercase();
            match ctx.selector.select_target(&tier).await {
                Ok(Some(target)) => {
                    registry.update(conn_id, |s| s.target = Some(target.clone()));
                    info!("player {player_id} assigned target {target} (tier {tier})");
                    Some(ServerReply::Status(StatusReply::target_assigned(
                        player_id, &target, &tier,
                    )))
                }
                Ok(None) => Some(ServerReply::Status(StatusReply::error(
                    player_id,
                    format!("No signs available for difficulty '{tier}'"),
                ))),
                Err(e) => {
                    warn!("player {player_id} target assignment failed: {e}");
                    Some(ServerReply::Status(StatusReply::error(
                        player_id,
                        format!("Could not pick a target: {e}"),
                    )))
                }
            }
        }

        ClientMessage::SetDominance { dominance } => match Handedness::from_label(&dominance) {
            Some(side) => {
                registry.update(conn_id, |s| s.dominance = side);
                Some(ServerReply::Status(StatusReply::dominance_set(
                    player_id,
                    &side.to_string(),
                )))
            }
            None => Some(ServerReply::Status(StatusReply::error(
                player_id,
                "Invalid dominance. Use 'LEFT' or 'RIGHT'.".to_string(),
            ))),
        },

        ClientMessage::StopTarget => {
            registry.update(conn_id, |s| s.target = None);
            info!("player {player_id} target stopped");
            Some(ServerReply::Status(StatusReply::target_stopped(player_id)))
        }

        ClientMessage::Image { image_data } => {
            let Some(target) = session.target else {
                // Idle sessions do no pose work
                debug!("player {player_id} sent a frame with no target armed");
                return None;
            };
            let verdict = process_frame(ctx, image_data, &target).await;
            Some(ServerReply::Verdict(VerdictReply {
                player_id: player_id.to_string(),
                result: verdict.correct,
                feedback: verdict.feedback,
                target,
                score: verdict.score,
            }))
        }

        ClientMessage::Unknown => Some(ServerReply::Status(StatusReply::unknown_command(
            player_id,
        ))),
    }
}

#[derive(Debug, Error)]
enum FrameError {
    #[error("image message carried no data")]
    MissingPayload,
    #[error("invalid base64 image payload: {0}")]
    InvalidPayload(base64::DecodeError),
    #[error("could not decode image: {0}")]
    InvalidImage(image::ImageError),
    #[error("hand detection failed: {0}")]
    Detector(anyhow::Error),
    #[error("no usable hand detected")]
    NoUsableHand,
    #[error("frame worker aborted: {0}")]
    Worker(String),
}

/// Full pipeline for one submitted frame: decode, detect, normalize,
/// assemble, evaluate. Every failure becomes a negative verdict.
async fn process_frame<D, S>(
    ctx: &GameContext<D, S>,
    image_data: Option<String>,
    target: &str,
) -> MatchVerdict
where
    D: HandDetector + 'static,
    S: SimilarityStore,
{
    match extract_fingerprint(ctx, image_data).await {
        Ok(fingerprint) => ctx.evaluator.evaluate(&fingerprint, target).await,
        Err(e) => MatchVerdict::failure(e),
    }
}

/// Run the CPU-bound part of the frame pipeline on the blocking pool.
async fn extract_fingerprint<D, S>(
    ctx: &GameContext<D, S>,
    image_data: Option<String>,
) -> Result<AssembledFingerprint, FrameError>
where
    D: HandDetector + 'static,
    S: SimilarityStore,
{
    let encoded = image_data.ok_or(FrameError::MissingPayload)?;
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(FrameError::InvalidPayload)?;

    // The permit bounds concurrent detection jobs across all connections
    let permit = Arc::clone(&ctx.detect_slots)
        .acquire_owned()
        .await
        .expect("detect slot semaphore closed");
    let detector = Arc::clone(&ctx.detector);
    let mode = ctx.mode;

    let job = tokio::task::spawn_blocking(move || {
        let _permit = permit;

        let image = image::load_from_memory(&bytes)
            .map_err(FrameError::InvalidImage)?
            .to_rgb8();
        let hands = detector
            .lock()
            .unwrap()
            .detect(&image)
            .map_err(FrameError::Detector)?;

        // Degenerate hands are skipped, not fatal; the player may still have
        // one usable hand in frame
        let fingerprints: Vec<_> = hands.iter().filter_map(|hand| normalize(hand).ok()).collect();

        assemble(&fingerprints, mode).map_err(|_: AssembleError| FrameError::NoUsableHand)
    });

    match job.await {
        Ok(result) => result,
        Err(e) => Err(FrameError::Worker(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    use image::RgbImage;
    use serde_json::{json, Value};
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    use crate::fingerprint::normalize::tests::sample_pose;
    use crate::hand::detector::testing::ScriptedDetector;
    use crate::hand::HandPose;
    use crate::store::testing::FakeStore;

    type Client = Framed<DuplexStream, LengthDelimitedCodec>;

    fn matching(mode: MatchMode) -> MatchingConfig {
        MatchingConfig {
            threshold: 0.98,
            mode,
        }
    }

    fn context(
        hands: Vec<HandPose>,
        signs: &[(&str, &str, f32)],
    ) -> Arc<GameContext<ScriptedDetector, FakeStore>> {
        Arc::new(GameContext::new(
            ScriptedDetector::new(hands),
            Arc::new(FakeStore::with_signs(signs)),
            &matching(MatchMode::Single),
            2,
        ))
    }

    fn start_session(
        ctx: &Arc<GameContext<ScriptedDetector, FakeStore>>,
        registry: &Arc<Registry>,
    ) -> Client {
        let (client_io, server_io) = tokio::io::duplex(4 * 1024 * 1024);
        let ctx = Arc::clone(ctx);
        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            let _ = run_session(server_io, ctx, registry).await;
        });
        protocol::framed(client_io)
    }

    async fn send(client: &mut Client, message: Value) {
        protocol::send_message(client, &message).await.unwrap();
    }

    async fn recv(client: &mut Client) -> ServerReply {
        timeout(Duration::from_secs(2), protocol::recv_message(client))
            .await
            .expect("timed out waiting for reply")
            .expect("connection closed")
    }

    async fn recv_status(client: &mut Client) -> StatusReply {
        match recv(client).await {
            ServerReply::Status(status) => status,
            other => panic!("expected status reply, got {other:?}"),
        }
    }

    async fn recv_verdict(client: &mut Client) -> VerdictReply {
        match recv(client).await {
            ServerReply::Verdict(verdict) => verdict,
            other => panic!("expected verdict reply, got {other:?}"),
        }
    }

    /// Tiny valid PNG, base64-encoded
    fn frame_payload() -> String {
        let image = RgbImage::new(8, 8);
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        BASE64.encode(buf.into_inner())
    }

    fn image_message() -> Value {
        json!({ "type": "image", "image_data": frame_payload() })
    }

    #[tokio::test]
    async fn test_connect_banner() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);

        let banner = recv_status(&mut client).await;
        assert_eq!(banner.status, "CONNECTED");
        assert!(banner.player_id.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_set_target_uppercases() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "a" })).await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "TARGET_SET");
        assert_eq!(reply.target.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_image_match_accepted_and_rejected() {
        let hand = sample_pose(Handedness::Right);
        let ctx = context(vec![hand], &[("A", "EASY", 0.99), ("B", "EASY", 0.5)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "a" })).await;
        recv_status(&mut client).await;

        send(&mut client, image_message()).await;
        let verdict = recv_verdict(&mut client).await;
        assert!(verdict.result);
        assert_eq!(verdict.target, "A");
        assert!((verdict.score - 99.0).abs() < 0.05);
        assert!(verdict.feedback.contains("99.0%"));

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "B" })).await;
        recv_status(&mut client).await;

        send(&mut client, image_message()).await;
        let verdict = recv_verdict(&mut client).await;
        assert!(!verdict.result);
        assert_eq!(verdict.target, "B");
    }

    #[tokio::test]
    async fn test_image_ignored_while_idle() {
        let ctx = context(vec![sample_pose(Handedness::Right)], &[("A", "EASY", 0.99)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        // No target armed: the frame is dropped without pose work, so the
        // next reply belongs to the following control message.
        send(&mut client, image_message()).await;
        send(&mut client, json!({ "type": "stop_target" })).await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "TARGET_STOPPED");
    }

    #[tokio::test]
    async fn test_no_usable_hand_verdict() {
        let ctx = context(vec![], &[("A", "EASY", 0.99)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "A" })).await;
        recv_status(&mut client).await;

        send(&mut client, image_message()).await;
        let verdict = recv_verdict(&mut client).await;
        assert!(!verdict.result);
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.feedback.contains("no usable hand"));
        assert!(verdict.feedback.contains("0.0%"));
    }

    #[tokio::test]
    async fn test_invalid_image_payload_verdict() {
        let ctx = context(vec![sample_pose(Handedness::Right)], &[("A", "EASY", 0.99)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "A" })).await;
        recv_status(&mut client).await;

        send(
            &mut client,
            json!({ "type": "image", "image_data": "$$$not-base64$$$" }),
        )
        .await;
        let verdict = recv_verdict(&mut client).await;
        assert!(!verdict.result);
        assert!(verdict.feedback.contains("base64"));

        // Session survives and still evaluates the next good frame
        send(&mut client, image_message()).await;
        assert!(recv_verdict(&mut client).await.result);
    }

    #[tokio::test]
    async fn test_assign_target_success() {
        let ctx = context(vec![], &[("HOLA", "EASY", 0.9)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(
            &mut client,
            json!({ "type": "assign_target", "difficulty": "easy" }),
        )
        .await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "TARGET_ASSIGNED");
        assert_eq!(reply.target.as_deref(), Some("HOLA"));
        assert_eq!(reply.difficulty.as_deref(), Some("EASY"));
    }

    #[tokio::test]
    async fn test_assign_target_exhausted_keeps_target() {
        let hand = sample_pose(Handedness::Right);
        let ctx = context(vec![hand], &[("A", "EASY", 0.99)]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "SET_TARGET", "sign": "A" })).await;
        recv_status(&mut client).await;

        send(
            &mut client,
            json!({ "type": "assign_target", "difficulty": "IMPOSSIBLE" }),
        )
        .await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "ERROR");

        // The armed target is unchanged
        send(&mut client, image_message()).await;
        let verdict = recv_verdict(&mut client).await;
        assert_eq!(verdict.target, "A");
    }

    #[tokio::test]
    async fn test_session_isolation() {
        let hand = sample_pose(Handedness::Right);
        let ctx = context(vec![hand], &[("A", "EASY", 0.99), ("B", "EASY", 0.5)]);
        let registry = Arc::new(Registry::new());

        let mut alice = start_session(&ctx, &registry);
        let mut bruno = start_session(&ctx, &registry);
        recv_status(&mut alice).await;
        recv_status(&mut bruno).await;
        assert_eq!(registry.len(), 2);

        send(&mut alice, json!({ "command": "SET_TARGET", "sign": "A" })).await;
        send(&mut bruno, json!({ "command": "SET_TARGET", "sign": "B" })).await;
        recv_status(&mut alice).await;
        recv_status(&mut bruno).await;

        // Same frame, independent verdicts against each session's own target
        send(&mut alice, image_message()).await;
        send(&mut bruno, image_message()).await;

        let for_alice = recv_verdict(&mut alice).await;
        let for_bruno = recv_verdict(&mut bruno).await;
        assert!(for_alice.result);
        assert_eq!(for_alice.target, "A");
        assert!(!for_bruno.result);
        assert_eq!(for_bruno.target, "B");
    }

    #[tokio::test]
    async fn test_dominance_set_and_rejected() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(
            &mut client,
            json!({ "command": "SET_DOMINANCE", "dominance": "left" }),
        )
        .await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "DOMINANCE_SET");
        assert_eq!(reply.dominance.as_deref(), Some("LEFT"));

        send(
            &mut client,
            json!({ "command": "SET_DOMINANCE", "dominance": "BOTH" }),
        )
        .await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "ERROR");
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(&mut client, json!({ "command": "DANCE" })).await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "UNKNOWN_COMMAND");
    }

    #[tokio::test]
    async fn test_malformed_json_gets_error_reply() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        use futures::SinkExt;
        client
            .send(bytes::Bytes::from_static(b"this is not json"))
            .await
            .unwrap();
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.status, "ERROR");

        // Connection stays open
        send(&mut client, json!({ "type": "stop_target" })).await;
        assert_eq!(recv_status(&mut client).await.status, "TARGET_STOPPED");
    }

    #[tokio::test]
    async fn test_player_id_rename_rides_any_message() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;

        send(
            &mut client,
            json!({ "command": "SET_TARGET", "sign": "A", "player_id": "godot-7" }),
        )
        .await;
        let reply = recv_status(&mut client).await;
        assert_eq!(reply.player_id.as_deref(), Some("godot-7"));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_registry() {
        let ctx = context(vec![], &[]);
        let registry = Arc::new(Registry::new());
        let mut client = start_session(&ctx, &registry);
        recv_status(&mut client).await;
        assert_eq!(registry.len(), 1);

        drop(client);
        // Give the session task a moment to observe the close
        for _ in 0..50 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
    }
}
