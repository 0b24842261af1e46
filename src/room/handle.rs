use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

use super::{CallRoom, RoomView, SummaryRoute};
use crate::error::CallError;
use crate::events::{EventReceiver, EventSender};
use crate::models::{Offer, PriceOverride, SidePanel};

/// User actions the room accepts while running on its own task.
#[derive(Debug)]
pub enum RoomAction {
    ToggleMute,
    ToggleCamera,
    ToggleScreenShare,
    SwitchDevice {
        audio_device_id: Option<String>,
        video_device_id: Option<String>,
    },
    RetryMedia,
    SetPanel(SidePanel),
    // Host
    Admit(String),
    Deny(String),
    Kick(String),
    PresentOffer {
        offer: Offer,
        targets: Option<Vec<String>>,
    },
    DismissOffer,
    SetPriceOverride {
        offer_id: String,
        price: PriceOverride,
    },
    ResetPriceOverride(String),
    StartRecording,
    StopRecording,
    ToggleTranscriptFlag {
        chunk_id: String,
        note: Option<String>,
    },
    MarkGuidanceUsed(String),
    DismissGuidance(String),
    // Guest
    AcceptOffer,
    DeclineOffer(Option<String>),
    MinimizeOffer,
    ExpandOffer,
    // Everyone
    SendChat(String),
}

#[derive(Debug)]
pub enum RoomCommand {
    Act {
        action: RoomAction,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    EndCall {
        reply: oneshot::Sender<SummaryRoute>,
    },
}

/// Handle to a room running on its own task. Dropping every handle tears
/// the room down without the end-call sequence.
#[derive(Clone)]
pub struct CallRoomHandle {
    commands: mpsc::Sender<RoomCommand>,
    view: watch::Receiver<RoomView>,
    events: EventSender,
}

impl CallRoomHandle {
    pub async fn act(&self, action: RoomAction) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Act { action, reply })
            .await
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)?
    }

    pub async fn end_call(&self) -> Result<SummaryRoute, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::EndCall { reply })
            .await
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }

    pub fn view(&self) -> RoomView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }
}

async fn next_tick(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

impl CallRoom {
    /// Move the room onto its own task.
    pub fn spawn(self) -> (CallRoomHandle, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(64);
        let handle = CallRoomHandle {
            commands,
            view: self.view_tx.subscribe(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(command_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<RoomCommand>) {
        info!("Call room loop started for {} in {}", self.participant_id(), self.room_code);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RoomCommand::Act { action, reply }) => {
                        let result = self.apply(action).await;
                        if let Err(e) = &result {
                            warn!("Room action failed: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(RoomCommand::EndCall { reply }) => {
                        let route = self.end_call().await;
                        let _ = reply.send(route);
                        break;
                    }
                    None => {
                        debug!("All room handles dropped");
                        break;
                    }
                },
                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,
                Some(item) = self.guidance_rx.recv() => self.add_guidance(item),
                _ = next_tick(&mut self.clock) => self.tick_call_timer(),
                _ = next_tick(&mut self.poll) => self.spawn_poll(),
            }
        }

        self.dispose();
        info!("Call room loop stopped for {}", self.room_code);
    }

    async fn apply(&mut self, action: RoomAction) -> Result<(), CallError> {
        match action {
            RoomAction::ToggleMute => {
                self.toggle_mute();
            }
            RoomAction::ToggleCamera => {
                self.toggle_camera();
            }
            RoomAction::ToggleScreenShare => {
                self.toggle_screen_share().await?;
            }
            RoomAction::SwitchDevice {
                audio_device_id,
                video_device_id,
            } => {
                self.switch_device(audio_device_id.as_deref(), video_device_id.as_deref())
                    .await?;
            }
            RoomAction::RetryMedia => self.retry_media().await?,
            RoomAction::SetPanel(panel) => self.set_panel(panel),
            RoomAction::Admit(id) => self.admit_participant(&id)?,
            RoomAction::Deny(id) => self.deny_participant(&id)?,
            RoomAction::Kick(id) => self.kick_participant(&id)?,
            RoomAction::PresentOffer { offer, targets } => {
                self.present_offer(&offer, targets)?;
            }
            RoomAction::DismissOffer => self.dismiss_offer()?,
            RoomAction::SetPriceOverride { offer_id, price } => self.set_price_override(&offer_id, price),
            RoomAction::ResetPriceOverride(offer_id) => self.reset_price_override(&offer_id),
            RoomAction::StartRecording => self.start_recording()?,
            RoomAction::StopRecording => self.stop_recording().await?,
            RoomAction::ToggleTranscriptFlag { chunk_id, note } => {
                self.toggle_transcript_flag(&chunk_id, note);
            }
            RoomAction::MarkGuidanceUsed(id) => {
                self.mark_guidance_used(&id);
            }
            RoomAction::DismissGuidance(id) => {
                self.dismiss_guidance(&id);
            }
            RoomAction::AcceptOffer => self.accept_offer(),
            RoomAction::DeclineOffer(reason) => self.decline_offer(reason),
            RoomAction::MinimizeOffer => self.minimize_offer(),
            RoomAction::ExpandOffer => self.expand_offer(),
            RoomAction::SendChat(content) => {
                self.send_chat(&content);
            }
        }
        Ok(())
    }
}
