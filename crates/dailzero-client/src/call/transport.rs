//! WebRTC transport to the realtime speech provider
//!
//! Owns the peer connection, the outbound microphone track, and the data
//! channel that carries protocol events. Remote audio is decoded off the
//! incoming track and handed to the playback device as raw samples.

use crate::error::{CallError, Result};
use dailzero_media::{AudioDecoder, FRAME_DURATION_MS};
use dailzero_protocol::{ClientEvent, EVENTS_CHANNEL_LABEL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

const OPUS_PAYLOAD_TYPE: u8 = 111;
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Events surfaced by the transport to the session manager
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The protocol data channel is open and writable
    ChannelOpen,
    /// A text frame arrived on the data channel
    Message(String),
    /// The data channel closed
    ChannelClosed,
    /// The peer connection left the connected state
    Disconnected,
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// WebRTC connection to the realtime provider
///
/// All state lives behind shared slots so clones can drive the connection
/// from the manager's background tasks.
#[derive(Clone)]
pub struct RealtimeTransport {
    peer_connection: Arc<RwLock<Option<Arc<RTCPeerConnection>>>>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    mic_track: Arc<RwLock<Option<Arc<TrackLocalStaticSample>>>>,
}

impl RealtimeTransport {
    pub fn new() -> Self {
        Self {
            peer_connection: Arc::new(RwLock::new(None)),
            data_channel: Arc::new(RwLock::new(None)),
            mic_track: Arc::new(RwLock::new(None)),
        }
    }

    /// Build the peer connection and return the local SDP offer.
    ///
    /// The offer includes gathered ICE candidates, so it can be exchanged
    /// over a single HTTP round trip with no trickle channel. Data-channel
    /// activity is reported on `events_tx`; decoded remote audio goes to
    /// `remote_audio_tx`.
    pub async fn connect(
        &self,
        ice_servers: Vec<String>,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        remote_audio_tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<String> {
        // Tear down any previous connection
        if self.is_connected().await {
            self.close().await?;
        }

        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: opus_capability(),
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        // Empty interceptor registry: retransmit buffering is unwanted
        // latency on a live call
        let registry = Registry::new();

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_server_configs: Vec<RTCIceServer> = ice_servers
            .into_iter()
            .map(|url| RTCIceServer {
                urls: vec![url],
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers: ice_server_configs,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        // Outbound microphone track
        let mic_track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            "dailzero-mic".to_string(),
        ));
        peer_connection.add_track(mic_track.clone()).await?;

        // Protocol events ride a data channel we open ourselves
        let data_channel = peer_connection
            .create_data_channel(EVENTS_CHANNEL_LABEL, None)
            .await?;
        wire_data_channel(&data_channel, events_tx.clone());
        *self.data_channel.write().await = Some(data_channel);

        // Some provider deployments announce the channel from their side
        // instead; adopt it when the label matches
        let dc_slot = self.data_channel.clone();
        let dc_events_tx = events_tx.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let slot = dc_slot.clone();
            let tx = dc_events_tx.clone();
            Box::pin(async move {
                if dc.label() != EVENTS_CHANNEL_LABEL {
                    tracing::debug!("Ignoring remote data channel {:?}", dc.label());
                    return;
                }
                tracing::info!("Adopting remote-announced data channel");
                wire_data_channel(&dc, tx);
                *slot.write().await = Some(dc);
            })
        }));

        let state_tx = events_tx;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                tracing::info!("Peer connection state: {:?}", state);
                match state {
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed => {
                        let _ = state_tx.send(TransportEvent::Disconnected);
                    }
                    _ => {}
                }
                Box::pin(async {})
            },
        ));

        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::info!(
                "Remote track: id={}, kind={:?}",
                track.id(),
                track.kind()
            );
            let audio_tx = remote_audio_tx.clone();
            Box::pin(async move {
                play_remote_track(track, audio_tx).await;
            })
        }));

        let offer = peer_connection.create_offer(None).await?;
        peer_connection.set_local_description(offer.clone()).await?;

        // Wait for ICE gathering so the offer carries the candidates;
        // on timeout proceed with whatever has been gathered
        let mut gather_done = peer_connection.gathering_complete_promise().await;
        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gather_done.recv())
            .await
            .is_err()
        {
            tracing::warn!(
                "ICE gathering incomplete after {:?}, sending partial offer",
                ICE_GATHERING_TIMEOUT
            );
        }

        let local_sdp = peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .unwrap_or(offer.sdp);

        *self.peer_connection.write().await = Some(peer_connection);
        *self.mic_track.write().await = Some(mic_track);

        tracing::info!("Peer connection ready, offer created");

        Ok(local_sdp)
    }

    /// Apply the provider's SDP answer.
    pub async fn set_answer(&self, sdp: String) -> Result<()> {
        let pc_guard = self.peer_connection.read().await;
        let pc = pc_guard.as_ref().ok_or(CallError::NotConnected)?;

        let answer = RTCSessionDescription::answer(sdp)?;
        pc.set_remote_description(answer).await?;

        tracing::info!("Remote answer applied");
        Ok(())
    }

    /// Serialize and send a protocol event on the data channel.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;

        let dc_guard = self.data_channel.read().await;
        let dc = dc_guard.as_ref().ok_or(CallError::NotConnected)?;

        dc.send_text(json).await?;
        Ok(())
    }

    /// Write one encoded microphone frame to the outbound track.
    pub async fn send_audio(&self, encoded: Vec<u8>) -> Result<()> {
        let track_guard = self.mic_track.read().await;
        let track = track_guard.as_ref().ok_or(CallError::NotConnected)?;

        let sample = Sample {
            data: encoded.into(),
            duration: Duration::from_millis(FRAME_DURATION_MS as u64),
            ..Default::default()
        };

        track.write_sample(&sample).await?;
        Ok(())
    }

    /// Close the connection and release the track and channel slots.
    pub async fn close(&self) -> Result<()> {
        if let Some(dc) = self.data_channel.write().await.take() {
            let _ = dc.close().await;
        }
        *self.mic_track.write().await = None;

        if let Some(pc) = self.peer_connection.write().await.take() {
            for sender in pc.get_senders().await {
                let _ = sender.stop().await;
            }
            pc.close().await?;
        }

        tracing::info!("Transport closed");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.peer_connection.read().await.is_some()
    }
}

impl Default for RealtimeTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, events_tx: mpsc::UnboundedSender<TransportEvent>) {
    let label = dc.label().to_string();

    let open_tx = events_tx.clone();
    dc.on_open(Box::new(move || {
        tracing::info!("Data channel {:?} open", label);
        let _ = open_tx.send(TransportEvent::ChannelOpen);
        Box::pin(async {})
    }));

    let message_tx = events_tx.clone();
    dc.on_message(Box::new(move |message: DataChannelMessage| {
        let tx = message_tx.clone();
        Box::pin(async move {
            if !message.is_string {
                return;
            }
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(TransportEvent::Message(text));
                }
                Err(e) => tracing::warn!("Dropping non-UTF-8 data channel frame: {}", e),
            }
        })
    }));

    let close_tx = events_tx;
    dc.on_close(Box::new(move || {
        let _ = close_tx.send(TransportEvent::ChannelClosed);
        Box::pin(async {})
    }));
}

/// Decode the provider's audio track and feed samples to playback.
///
/// One packet per RTP payload; a gap in sequence numbers is concealed
/// once before the next good frame so playback does not click.
async fn play_remote_track(track: Arc<TrackRemote>, audio_tx: mpsc::Sender<Vec<f32>>) {
    let mut decoder = match AudioDecoder::new() {
        Ok(dec) => dec,
        Err(e) => {
            tracing::error!("Failed to create audio decoder: {}", e);
            return;
        }
    };

    let mut last_seq: Option<u16> = None;

    loop {
        match track.read_rtp().await {
            Ok((rtp_packet, _attributes)) => {
                if rtp_packet.payload.is_empty() {
                    continue;
                }

                let seq = rtp_packet.header.sequence_number;
                if let Some(prev) = last_seq {
                    if seq != prev.wrapping_add(1) {
                        if let Ok(concealed) = decoder.conceal_loss() {
                            let _ = audio_tx.send(concealed).await;
                        }
                    }
                }
                last_seq = Some(seq);

                match decoder.decode_float(&rtp_packet.payload) {
                    Ok(samples) => {
                        if audio_tx.send(samples).await.is_err() {
                            // Playback side is gone, stop reading
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Opus decode error: {}", e);
                    }
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("closed") {
                    tracing::info!("Remote audio track closed");
                    break;
                }
                if error_msg.contains("RTPReceiver must not be nil") {
                    tracing::info!("Remote audio track ended");
                    break;
                }
                tracing::warn!("Error reading RTP from remote track: {}", e);
            }
        }
    }
}
