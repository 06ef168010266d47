//! Shopping assistant: one free-text utterance in, one catalog, cart or order
//! side effect out.
//!
//! Per session the assistant is either idle or awaiting a yes/no for a stored
//! [`PendingIntent`]. Search, add-to-cart and place-order always go through
//! that confirmation; viewing the cart runs immediately. While awaiting, an
//! affirmation executes the stored intent. Anything else discards it and is
//! classified as a fresh utterance.

pub mod actions;
pub mod intent;
pub mod session;

use uuid::Uuid;

use crate::{api::classifier::IntentClassifier, core::app_error::AppError};

use self::{
    intent::{Intent, is_affirmation, parse_reply},
    session::{PendingIntent, PendingIntentStore},
};

/// A side effect the assistant has decided to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(Option<String>),
    AddToCart(Option<String>),
    ViewCart,
    PlaceOrder,
}

impl From<PendingIntent> for Command {
    fn from(pending: PendingIntent) -> Self {
        Command::new(pending.intent, pending.parameter)
    }
}

impl Command {
    fn new(intent: Intent, parameter: Option<String>) -> Self {
        match intent {
            Intent::Search => Command::Search(parameter),
            Intent::AddToCart => Command::AddToCart(parameter),
            Intent::ViewCart => Command::ViewCart,
            Intent::PlaceOrder => Command::PlaceOrder,
        }
    }
}

/// Outcome of one turn, before any side effect runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// A pending intent was stored; ask the user to confirm it.
    Confirm(String),
    Execute(Command),
    NotUnderstood,
}

pub const NOT_UNDERSTOOD: &str = "No entendí tu solicitud.";

/// Advances the session's state machine for one utterance.
pub async fn next_turn(
    store: &PendingIntentStore,
    classifier: &dyn IntentClassifier,
    session: Uuid,
    text: &str,
) -> Result<Turn, AppError> {
    if is_affirmation(text) {
        if let Some(pending) = store.take(session) {
            tracing::debug!("Session {} confirmed {:?}", session, pending.intent);
            return Ok(Turn::Execute(pending.into()));
        }
    } else if store.discard(session) {
        tracing::debug!("Session {} dropped its pending intent", session);
    }

    let reply = classifier.classify(text).await?;
    let classification = parse_reply(&reply);

    let Some(intent) = classification.intent() else {
        tracing::debug!("Unrecognized intent {:?}", classification.token);
        return Ok(Turn::NotUnderstood);
    };

    match intent.confirmation_prompt(classification.parameter.as_deref()) {
        Some(prompt) if intent.requires_confirmation() => {
            store.put(
                session,
                PendingIntent {
                    intent,
                    parameter: classification.parameter,
                },
            );
            Ok(Turn::Confirm(prompt))
        }
        _ => Ok(Turn::Execute(Command::new(intent, classification.parameter))),
    }
}
