//! The per-turn streaming pipeline: LLM tokens → boundary buffer → TTS →
//! outbound sink.
//!
//! Three cooperating producers/consumers joined by two bounded channels:
//! the LLM adapter feeds the token channel, this task flushes boundary
//! chunks into the TTS sink, and the audio pump forwards synthesized
//! chunks to the outbound sink. Backpressure is the channels themselves;
//! an outbound send that exceeds the slow-consumer deadline fails the turn.

use crate::adapters::{LanguageModel, LlmEvent, TextToSpeech, TtsEvent, TtsSink, VoiceConfig};
use crate::boundary::BoundaryBuffer;
use crate::error::{SessionError, SessionResult};
use crate::frames::OutboundFrame;
use crate::prompt::AssembledPrompt;
use crate::session::SessionMsg;
use crate::sink::EventSink;
use solace_core::SolaceConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything one turn needs. Owned by the spawned turn task.
pub struct TurnParams {
    pub turn_id: String,
    pub transcript: String,
    pub prompt: AssembledPrompt,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub voice: VoiceConfig,
    pub sink: EventSink,
    pub playback_id: u64,
    pub config: Arc<SolaceConfig>,
    pub cancel: watch::Receiver<bool>,
    pub mailbox: mpsc::Sender<SessionMsg>,
}

/// Run one turn to completion and report the outcome to the session actor.
pub fn spawn_turn(params: TurnParams) -> JoinHandle<()> {
    tokio::spawn(async move {
        let turn_id = params.turn_id.clone();
        let transcript = params.transcript.clone();
        let mailbox = params.mailbox.clone();
        let (reply, outcome) = drive(params).await;
        let _ = mailbox
            .send(SessionMsg::TurnComplete {
                turn_id,
                transcript,
                reply,
                outcome,
            })
            .await;
    })
}

async fn drive(params: TurnParams) -> (String, SessionResult<()>) {
    let TurnParams {
        turn_id,
        transcript: _,
        prompt,
        llm,
        tts,
        voice,
        sink,
        playback_id,
        config,
        mut cancel,
        mailbox,
    } = params;

    let mut reply = String::new();
    let mut boundary = BoundaryBuffer::new(config.boundary_soft_limit_bytes, config.boundary_max_bytes);
    let mut tts_sink: Option<Box<dyn TtsSink>> = None;
    let mut pump: Option<JoinHandle<SessionResult<()>>> = None;

    let res: SessionResult<()> = async {
        let mut tokens = match tokio::time::timeout(
            config.vendor_request_timeout(),
            llm.stream_reply(&prompt, config.token_channel_capacity),
        )
        .await
        {
            Err(_) => return Err(SessionError::VendorTimeout("llm request start".to_string())),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(rx)) => rx,
        };

        let deadline = tokio::time::Instant::now() + config.vendor_stream_timeout();

        'generation: loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(SessionError::Interrupted);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SessionError::VendorTimeout("llm stream".to_string()));
                }
                event = tokio::time::timeout(config.boundary_idle(), tokens.recv()) => match event {
                    // Idle flush keeps the TTS fed between slow tokens.
                    Err(_) => {
                        if let Some(chunk) = boundary.flush_idle() {
                            dispatch_chunk(
                                &tts, &voice, &config, &sink, playback_id,
                                &mailbox, &turn_id, &mut tts_sink, &mut pump, &chunk,
                            )
                            .await?;
                        }
                    }
                    Ok(Some(LlmEvent::Token(token))) => {
                        sink.send(OutboundFrame::TokenStream {
                            content: token.clone(),
                        })
                        .await?;
                        reply.push_str(&token);
                        if let Some(chunk) = boundary.push(&token) {
                            dispatch_chunk(
                                &tts, &voice, &config, &sink, playback_id,
                                &mailbox, &turn_id, &mut tts_sink, &mut pump, &chunk,
                            )
                            .await?;
                        }
                    }
                    Ok(Some(LlmEvent::Error { message })) => {
                        return Err(SessionError::Llm(message));
                    }
                    Ok(Some(LlmEvent::Done)) | Ok(None) => break 'generation,
                }
            }
        }

        if let Some(chunk) = boundary.finish() {
            dispatch_chunk(
                &tts, &voice, &config, &sink, playback_id,
                &mailbox, &turn_id, &mut tts_sink, &mut pump, &chunk,
            )
            .await?;
        }

        if let Some(s) = tts_sink.as_mut() {
            s.close().await?;
        }

        // The LLM is done; stay in this task until the TTS closes and the
        // audio queue drains, so stream end is emitted strictly after the
        // last chunk.
        if let Some(mut p) = pump.take() {
            let drained = loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break Err(SessionError::Interrupted);
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        break Err(SessionError::VendorTimeout("tts drain".to_string()));
                    }
                    joined = &mut p => break match joined {
                        Ok(result) => result,
                        Err(_) => Err(SessionError::ChannelClosed("audio pump".to_string())),
                    },
                }
            };
            if drained.is_err() {
                p.abort();
            }
            drained?;
        }
        Ok(())
    }
    .await;

    // Teardown on any failure: close the TTS upstream and kill the pump.
    // Orphaned audio is already fenced by the playback id.
    let res = if res.is_err() {
        if let Some(mut s) = tts_sink.take() {
            if tokio::time::timeout(config.cleanup_subcall_timeout(), s.close())
                .await
                .is_err()
            {
                warn!(target: "solace::pipeline", turn = %turn_id, "tts close timed out during teardown");
            }
        }
        let mut res = res;
        if let Some(p) = pump.take() {
            if p.is_finished() {
                // A dead pump is usually the root cause (e.g. slow_consumer
                // closed the audio channel under the TTS sink).
                if let Ok(Err(pump_err)) = p.await {
                    if matches!(res, Err(SessionError::ChannelClosed(_))) {
                        res = Err(pump_err);
                    }
                }
            } else {
                p.abort();
            }
        }
        res
    } else {
        res
    };

    (reply, res)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_chunk(
    tts: &Arc<dyn TextToSpeech>,
    voice: &VoiceConfig,
    config: &Arc<SolaceConfig>,
    sink: &EventSink,
    playback_id: u64,
    mailbox: &mpsc::Sender<SessionMsg>,
    turn_id: &str,
    tts_sink: &mut Option<Box<dyn TtsSink>>,
    pump: &mut Option<JoinHandle<SessionResult<()>>>,
    chunk: &str,
) -> SessionResult<()> {
    if tts_sink.is_none() {
        let stream = tokio::time::timeout(
            config.vendor_request_timeout(),
            tts.open_stream(voice, config.audio_channel_capacity),
        )
        .await
        .map_err(|_| SessionError::VendorTimeout("tts open".to_string()))??;
        debug!(target: "solace::pipeline", turn = turn_id, "tts stream opened");
        *pump = Some(spawn_audio_pump(
            stream.audio,
            sink.clone(),
            playback_id,
            mailbox.clone(),
            turn_id.to_string(),
        ));
        *tts_sink = Some(stream.sink);
    }
    if let Some(s) = tts_sink.as_mut() {
        s.send_text(chunk).await?;
    }
    Ok(())
}

/// Forward synthesized audio to the outbound sink, tagging every chunk with
/// the turn's playback session. The first chunk moves the session from
/// `Generating` to `Speaking`.
fn spawn_audio_pump(
    mut audio: mpsc::Receiver<TtsEvent>,
    sink: EventSink,
    playback_id: u64,
    mailbox: mpsc::Sender<SessionMsg>,
    turn_id: String,
) -> JoinHandle<SessionResult<()>> {
    tokio::spawn(async move {
        let mut first = true;
        loop {
            match audio.recv().await {
                Some(TtsEvent::Audio(bytes)) => {
                    if first {
                        first = false;
                        let _ = mailbox
                            .send(SessionMsg::TurnSpeaking {
                                turn_id: turn_id.clone(),
                            })
                            .await;
                    }
                    sink.send_audio(playback_id, &bytes).await?;
                }
                Some(TtsEvent::Error { message }) => return Err(SessionError::Tts(message)),
                Some(TtsEvent::Closed) | None => return Ok(()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScriptedLlm, ScriptedTts};
    use crate::playback::PlaybackSessions;
    use std::time::Duration;

    struct Harness {
        outbound: mpsc::Receiver<OutboundFrame>,
        mailbox_rx: mpsc::Receiver<SessionMsg>,
        cancel_tx: watch::Sender<bool>,
        playback: Arc<PlaybackSessions>,
    }

    fn launch(llm: ScriptedLlm, tts: ScriptedTts, config: SolaceConfig) -> (JoinHandle<()>, Harness) {
        let config = Arc::new(config);
        let playback = Arc::new(PlaybackSessions::new());
        let (sink, outbound) = EventSink::new(
            config.outbound_channel_capacity,
            playback.clone(),
            config.slow_consumer_timeout(),
        );
        let (mailbox_tx, mailbox_rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let playback_id = playback.begin();
        let task = spawn_turn(TurnParams {
            turn_id: "turn-1".to_string(),
            transcript: "hi there".to_string(),
            prompt: AssembledPrompt {
                system: "sys".to_string(),
                user_text: "hi there".to_string(),
            },
            llm: Arc::new(llm),
            tts: Arc::new(tts),
            voice: VoiceConfig::default(),
            sink,
            playback_id,
            config,
            cancel: cancel_rx,
            mailbox: mailbox_tx,
        });
        (
            task,
            Harness {
                outbound,
                mailbox_rx,
                cancel_tx,
                playback,
            },
        )
    }

    async fn final_outcome(h: &mut Harness) -> (String, SessionResult<()>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), h.mailbox_rx.recv())
                .await
                .expect("turn did not finish")
            {
                Some(SessionMsg::TurnComplete { reply, outcome, .. }) => return (reply, outcome),
                Some(_) => continue,
                None => panic!("mailbox closed"),
            }
        }
    }

    #[tokio::test]
    async fn tokens_then_audio_then_completion() {
        let (task, mut h) = launch(
            ScriptedLlm::new(vec!["Hey", " there", "."]),
            ScriptedTts::new(2),
            SolaceConfig::default(),
        );

        let (reply, outcome) = final_outcome(&mut h).await;
        outcome.unwrap();
        assert_eq!(reply, "Hey there.");
        task.await.unwrap();

        let mut tokens = 0;
        let mut audio = 0;
        let mut first_audio_after_tokens = false;
        while let Ok(frame) = h.outbound.try_recv() {
            match frame {
                OutboundFrame::TokenStream { .. } => tokens += 1,
                OutboundFrame::AudioChunk { .. } => {
                    if tokens > 0 {
                        first_audio_after_tokens = true;
                    }
                    audio += 1;
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert_eq!(tokens, 3);
        assert_eq!(audio, 2);
        assert!(first_audio_after_tokens);
    }

    #[tokio::test]
    async fn llm_error_before_flush_emits_no_audio() {
        // Two short tokens, no punctuation: the boundary never flushes, the
        // TTS never opens, then the stream dies.
        let (task, mut h) = launch(
            ScriptedLlm::new(vec!["he", "ll", "o"]).failing_after(2),
            ScriptedTts::new(2),
            SolaceConfig::default(),
        );

        let (_, outcome) = final_outcome(&mut h).await;
        assert!(matches!(outcome, Err(SessionError::Llm(_))));
        task.await.unwrap();

        while let Ok(frame) = h.outbound.try_recv() {
            assert!(
                !matches!(frame, OutboundFrame::AudioChunk { .. }),
                "no audio may be emitted when the LLM dies before TTS opens"
            );
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_turn() {
        let (task, mut h) = launch(
            ScriptedLlm::new(vec!["One.", "Two.", "Three."])
                .with_token_delay(Duration::from_millis(50)),
            ScriptedTts::new(4).with_chunk_delay(Duration::from_millis(30)),
            SolaceConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.playback.invalidate();
        h.cancel_tx.send(true).unwrap();

        let (_, outcome) = final_outcome(&mut h).await;
        assert!(matches!(outcome, Err(SessionError::Interrupted)));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_outbound_fails_as_slow_consumer() {
        let config = SolaceConfig {
            outbound_channel_capacity: 2,
            slow_consumer_timeout_ms: 60,
            ..SolaceConfig::default()
        };
        // Plenty of audio, nobody draining the outbound receiver.
        let (task, mut h) = launch(
            ScriptedLlm::new(vec!["A very long sentence to synthesize."]),
            ScriptedTts::new(32),
            config,
        );

        // Do not read h.outbound: the sink backs up and times out.
        let (_, outcome) = final_outcome(&mut h).await;
        assert!(matches!(outcome, Err(SessionError::SlowConsumer)));
        task.await.unwrap();
        drop(h);
    }
}
