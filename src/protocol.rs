//! TCP protocol between a frame-sending client and the pose server.
//!
//! Length-delimited frames, each carrying one bincode-encoded message.

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::pipeline::PoseResult;
use crate::tracker::mistakes::TrackingStatus;
use crate::tracker::report::Report;

pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

// --- Message types ---

/// Client → Server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Encoded image (JPEG/PNG/WebP) with client metadata
    Frame {
        timestamp: f64,
        sequence: u64,
        use_3d: bool,
        image: Vec<u8>,
    },
    StartTracking,
    StopTracking,
    Reset,
    Status,
    Report,
    ExportReport,
    Screenshot { id: String },
    Health,
}

/// Server → Client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Pose(PoseResult),
    Status(TrackingStatus),
    Report(Report),
    Exported { path: String },
    Screenshot { id: String, data: Vec<u8> },
    Health { version: String },
    Error { message: String },
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;
pub type MessageSink = SplitSink<MessageStream, Bytes>;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    Framed::new(stream, codec())
}

pub fn encode<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(msg)?))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Send a serializable message (bincode + length prefix).
pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> anyhow::Result<()> {
    stream.send(encode(msg)?).await?;
    Ok(())
}

/// Send on the write half of a split stream.
pub async fn send_to_sink<T: Serialize>(sink: &mut MessageSink, msg: &T) -> anyhow::Result<()> {
    sink.send(encode(msg)?).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(bytes)) => decode(&bytes),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_slot::Mode;
    use crate::pipeline::StageTimings;
    use crate::pose::keypoint::{BodyPart, HandPair, Keypoint};
    use crate::tracker::angles::Joint;
    use tokio::net::TcpListener;

    fn sample_result() -> PoseResult {
        PoseResult {
            sequence: 3,
            timestamp: 1234.5,
            mode: Mode::ThreeD,
            body: vec![Keypoint {
                name: BodyPart::Nose,
                x: 10.0,
                y: 20.0,
                confidence: 97.0,
                visible: true,
                normalized_x: Some(0.1),
                normalized_y: Some(0.2),
                z: None,
            }],
            hands: HandPair::default(),
            pose_3d_angles: [(Joint::LeftKnee, 170.5)].into_iter().collect(),
            pose_3d_coords: Default::default(),
            timings: StageTimings::default(),
            tracking_active: true,
            dropped_frames: 2,
        }
    }

    #[test]
    fn test_pose_message_bincode() {
        let msg = ServerMessage::Pose(sample_result());
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode::<ServerMessage>(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_report_message_bincode() {
        let msg = ServerMessage::Report(Report::empty("session_x"));
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode::<ServerMessage>(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<ClientMessage>(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = message_stream(stream);
            let msg: ClientMessage = recv_message(&mut framed).await.unwrap();
            assert!(matches!(msg, ClientMessage::Frame { sequence: 7, .. }));
            send_message(&mut framed, &ServerMessage::Health { version: "test".into() })
                .await
                .unwrap();
        });

        let mut client = message_stream(TcpStream::connect(addr).await.unwrap());
        let frame = ClientMessage::Frame {
            timestamp: 1.0,
            sequence: 7,
            use_3d: false,
            image: vec![0u8; 1024],
        };
        send_message(&mut client, &frame).await.unwrap();
        let reply: ServerMessage = recv_message(&mut client).await.unwrap();
        assert_eq!(reply, ServerMessage::Health { version: "test".into() });
        server.await.unwrap();
    }
}
