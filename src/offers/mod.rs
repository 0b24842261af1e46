use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::models::{Offer, OfferResponse, OfferResponseStatus, PresentedOffer, PriceOverride};
use crate::signaling::{OfferReply, SignalEvent};

/// Host side of the offer protocol.
#[derive(Debug, Default)]
pub struct OfferPresenter {
    price_overrides: HashMap<String, PriceOverride>,
    presented_offer_id: Option<String>,
    responses: HashMap<String, HashMap<String, OfferResponse>>,
}

impl OfferPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price_override(&mut self, offer_id: &str, price: PriceOverride) {
        debug!("Price override for {}: {}", offer_id, price.price_display);
        self.price_overrides.insert(offer_id.to_string(), price);
    }

    pub fn reset_price_override(&mut self, offer_id: &str) -> bool {
        self.price_overrides.remove(offer_id).is_some()
    }

    pub fn price_override(&self, offer_id: &str) -> Option<&PriceOverride> {
        self.price_overrides.get(offer_id)
    }

    pub fn project(&self, offer: &Offer) -> PresentedOffer {
        PresentedOffer::project(offer, self.price_override(&offer.id))
    }

    pub fn presented_offer_id(&self) -> Option<&str> {
        self.presented_offer_id.as_deref()
    }

    /// One targeted `offer-presented` per distinct target, carrying the
    /// current projection. Targets start out pending.
    pub fn present(&mut self, offer: &Offer, targets: &[String]) -> Vec<(String, SignalEvent)> {
        let projection = self.project(offer);
        let mut seen = HashSet::new();
        let sends: Vec<(String, SignalEvent)> = targets
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| (id.clone(), SignalEvent::OfferPresented(projection.clone())))
            .collect();

        let responses = self.responses.entry(offer.id.clone()).or_default();
        for (target, _) in &sends {
            responses.entry(target.clone()).or_insert_with(|| OfferResponse {
                participant_name: String::new(),
                status: OfferResponseStatus::Pending,
                reason: None,
            });
        }
        self.presented_offer_id = Some(offer.id.clone());
        info!("Presenting offer {} to {} participant(s)", offer.id, sends.len());
        sends
    }

    /// Clear the presented offer. Returns the broadcast to send, if one was up.
    pub fn dismiss(&mut self) -> Option<SignalEvent> {
        let offer_id = self.presented_offer_id.take()?;
        info!("Dismissed offer {}", offer_id);
        Some(SignalEvent::OfferDismissed { offer_id: Some(offer_id) })
    }

    /// Later responses from the same participant replace earlier ones.
    pub fn record_response(&mut self, offer_id: &str, participant_id: &str, response: OfferResponse) {
        debug!(
            "Offer {} response from {}: {:?}",
            offer_id, participant_id, response.status
        );
        self.responses
            .entry(offer_id.to_string())
            .or_default()
            .insert(participant_id.to_string(), response);
    }

    pub fn responses_for(&self, offer_id: &str) -> Option<&HashMap<String, OfferResponse>> {
        self.responses.get(offer_id)
    }

    pub fn response(&self, offer_id: &str, participant_id: &str) -> Option<&OfferResponse> {
        self.responses.get(offer_id)?.get(participant_id)
    }

    pub fn all_responses(&self) -> &HashMap<String, HashMap<String, OfferResponse>> {
        &self.responses
    }
}

/// Guest side: the offer currently shown, if any.
#[derive(Debug, Default)]
pub struct OfferInbox {
    guest_name: String,
    current: Option<PresentedOffer>,
    host_id: Option<String>,
    minimized: bool,
}

impl OfferInbox {
    pub fn new(guest_name: impl Into<String>) -> Self {
        Self {
            guest_name: guest_name.into(),
            ..Default::default()
        }
    }

    pub fn current(&self) -> Option<&PresentedOffer> {
        self.current.as_ref()
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn receive(&mut self, host_id: &str, offer: PresentedOffer) {
        info!("Offer {} received from {}", offer.id, host_id);
        self.current = Some(offer);
        self.host_id = Some(host_id.to_string());
        self.minimized = false;
    }

    /// Host dismissal. `None` clears whatever is showing.
    pub fn dismiss(&mut self, offer_id: Option<&str>) -> bool {
        let matches = match (offer_id, &self.current) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(id), Some(current)) => current.id == id,
        };
        if matches {
            self.current = None;
            self.minimized = false;
        }
        matches
    }

    fn reply(&self, reason: Option<String>) -> Option<(Option<String>, OfferReply)> {
        let offer = self.current.as_ref()?;
        Some((
            self.host_id.clone(),
            OfferReply {
                offer_id: offer.id.clone(),
                guest_name: self.guest_name.clone(),
                reason,
            },
        ))
    }

    /// Accept the shown offer. Returns the reply and who to send it to
    /// (`None` broadcasts).
    pub fn accept(&mut self) -> Option<(Option<String>, SignalEvent)> {
        let (target, reply) = self.reply(None)?;
        self.current = None;
        self.minimized = false;
        Some((target, SignalEvent::OfferAccepted(reply)))
    }

    pub fn decline(&mut self, reason: Option<String>) -> Option<(Option<String>, SignalEvent)> {
        let (target, reply) = self.reply(reason)?;
        self.current = None;
        self.minimized = false;
        Some((target, SignalEvent::OfferDeclined(reply)))
    }

    /// Collapse the overlay; the offer stays available.
    pub fn minimize(&mut self) -> Option<(Option<String>, SignalEvent)> {
        let (target, reply) = self.reply(None)?;
        self.minimized = true;
        Some((target, SignalEvent::OfferMinimized(reply)))
    }

    pub fn expand(&mut self) {
        if self.current.is_some() {
            self.minimized = false;
        }
    }
}

/// Host-side record for an inbound guest reply.
pub fn response_from_reply(event: &SignalEvent) -> Option<(&str, OfferResponse)> {
    let (reply, status) = match event {
        SignalEvent::OfferAccepted(r) => (r, OfferResponseStatus::Accepted),
        SignalEvent::OfferDeclined(r) => (r, OfferResponseStatus::Declined),
        SignalEvent::OfferMinimized(r) => (r, OfferResponseStatus::Minimized),
        _ => return None,
    };
    Some((
        reply.offer_id.as_str(),
        OfferResponse {
            participant_name: reply.guest_name.clone(),
            status,
            reason: reply.reason.clone(),
        },
    ))
}
