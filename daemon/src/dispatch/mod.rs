//! Command dispatcher
//!
//! Maps recognised gestures and voice commands onto call-control actions.
//! [`resolve`] is the pure mapping; [`CommandDispatcher`] adds stale-result
//! rejection and forwards the action to the collaborator.

mod action;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::backend::{CommandLabel, GestureLabel};
use crate::call::{CallContext, CallControl, CallError};
use crate::events::DaemonEvent;
use crate::mode::ModeSnapshot;

pub use action::{ActionKind, CallAction, CommandInput, DetectedCommand};

/// Domain failures while resolving a command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no number to save: dial a number or make a call first")]
    NoNumberToSave,
}

/// Receiver of recognised commands
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: DetectedCommand);
}

/// Map one input to at most one action
pub fn resolve<C: CallContext + ?Sized>(
    input: &CommandInput,
    ctx: &C,
) -> Result<Option<CallAction>, DispatchError> {
    match input {
        CommandInput::Gesture { gesture } => match gesture {
            GestureLabel::Call => Ok(dial_staged(ctx)),
            GestureLabel::Save => save_target(None, ctx).map(Some),
            GestureLabel::Delete => Ok(Some(CallAction::DeleteDigit)),
            GestureLabel::Hangup => Ok(Some(CallAction::Hangup)),
            GestureLabel::None => Ok(None),
        },
        CommandInput::Voice(command) => match command.command {
            CommandLabel::Call => Ok(match command.params.as_deref() {
                Some(params) => dial_target(params, ctx),
                None => dial_staged(ctx),
            }),
            CommandLabel::Save => save_target(command.params.as_deref(), ctx).map(Some),
            CommandLabel::Delete => Ok(Some(CallAction::DeleteDigit)),
            CommandLabel::Block => Ok(Some(CallAction::Block {
                number: ctx
                    .active_call()
                    .map(|call| call.number)
                    .or_else(|| non_empty(ctx.staged_number())),
            })),
            CommandLabel::None => Ok(None),
        },
    }
}

/// `params` as a dialable number: digits once separators are stripped
pub fn as_phone_number(params: &str) -> Option<String> {
    let digits: String = params
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '+'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if digits != params {
        debug!(spoken = %params, dialed = %digits, "separators stripped from spoken number");
    }
    Some(digits)
}

fn non_empty(number: String) -> Option<String> {
    (!number.is_empty()).then_some(number)
}

fn dial_staged<C: CallContext + ?Sized>(ctx: &C) -> Option<CallAction> {
    non_empty(ctx.staged_number()).map(|number| CallAction::Dial { number })
}

/// Contact name match first, then a raw number
fn dial_target<C: CallContext + ?Sized>(params: &str, ctx: &C) -> Option<CallAction> {
    if let Some(contact) = ctx.find_contact_by_name(params) {
        debug!(name = %contact.name, "call target resolved to contact");
        return Some(CallAction::Dial {
            number: contact.phone_number,
        });
    }
    match as_phone_number(params) {
        Some(number) => Some(CallAction::Dial { number }),
        None => {
            warn!(%params, "call target is neither a contact nor a number");
            None
        }
    }
}

/// Spoken number, else staged number, else the most recent call
fn save_target<C: CallContext + ?Sized>(
    params: Option<&str>,
    ctx: &C,
) -> Result<CallAction, DispatchError> {
    if let Some(number) = params.and_then(as_phone_number) {
        return Ok(CallAction::SaveContact {
            suggested_name: format!("Contact {}", number),
            number,
        });
    }

    if let Some(number) = non_empty(ctx.staged_number()) {
        return Ok(CallAction::SaveContact {
            suggested_name: format!("Contact {}", number),
            number,
        });
    }

    match ctx.most_recent_call() {
        Some(log) if !log.phone_number.is_empty() => Ok(CallAction::SaveContact {
            suggested_name: log
                .name
                .unwrap_or_else(|| format!("Contact {}", log.phone_number)),
            number: log.phone_number,
        }),
        _ => Err(DispatchError::NoNumberToSave),
    }
}

/// Applies resolved actions to call control, dropping stale inputs
pub struct CommandDispatcher {
    calls: Arc<dyn CallControl>,
    mode_rx: watch::Receiver<ModeSnapshot>,
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl CommandDispatcher {
    pub fn new(
        calls: Arc<dyn CallControl>,
        mode_rx: watch::Receiver<ModeSnapshot>,
        event_tx: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            calls,
            mode_rx,
            event_tx,
        }
    }

    /// Handle one recognised input; returns the action performed, if any
    pub fn handle(&self, command: DetectedCommand) -> Option<CallAction> {
        let current = *self.mode_rx.borrow();
        if !current.is_current(command.input.origin(), command.epoch) {
            debug!(
                input = ?command.input,
                epoch = command.epoch,
                current = current.epoch,
                "dropping stale command"
            );
            return None;
        }

        match resolve(&command.input, self.calls.as_ref()) {
            Ok(Some(action)) => {
                self.perform(&action);
                Some(action)
            }
            Ok(None) => {
                debug!(input = ?command.input, "no action for input");
                None
            }
            Err(e) => {
                warn!(error = %e, "command not dispatched");
                let _ = self.event_tx.send(DaemonEvent::NoNumberToSave);
                None
            }
        }
    }

    fn perform(&self, action: &CallAction) {
        let result: Result<(), CallError> = match action {
            CallAction::Dial { number } => self.calls.dial(number).map(drop),
            CallAction::Hangup => self.calls.hangup().map(drop),
            CallAction::SaveContact {
                number,
                suggested_name,
            } => self.calls.save_contact(number, suggested_name).map(drop),
            CallAction::DeleteDigit => {
                self.calls.delete_last_digit();
                Ok(())
            }
            CallAction::Block { number } => self.calls.block(number.as_deref()),
        };

        let event = match result {
            Ok(()) => {
                info!(kind = ?action.kind(), target = ?action.target(), "action dispatched");
                DaemonEvent::ActionDispatched {
                    action: action.clone(),
                }
            }
            Err(e) => {
                warn!(%action, error = %e, "call control rejected action");
                DaemonEvent::ActionFailed {
                    action: action.clone(),
                    reason: e.to_string(),
                }
            }
        };
        let _ = self.event_tx.send(event);
    }
}

impl CommandSink for CommandDispatcher {
    fn submit(&self, command: DetectedCommand) {
        self.handle(command);
    }
}

#[cfg(test)]
impl CommandSink for tokio::sync::mpsc::UnboundedSender<DetectedCommand> {
    fn submit(&self, command: DetectedCommand) {
        let _ = self.send(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VoiceCommand;
    use crate::call::LocalCallControl;
    use crate::mode::InputMode;

    fn voice(command: CommandLabel, params: &str) -> CommandInput {
        CommandInput::Voice(VoiceCommand::new(command, params))
    }

    fn gesture(gesture: GestureLabel) -> CommandInput {
        CommandInput::Gesture { gesture }
    }

    fn staged(number: &str) -> LocalCallControl {
        let calls = LocalCallControl::in_memory();
        for key in number.chars() {
            calls.press_key(key).unwrap();
        }
        calls
    }

    #[test]
    fn test_voice_save_uses_staged_number() {
        let calls = staged("5551234567");
        let action = resolve(&voice(CommandLabel::Save, ""), &calls).unwrap();
        assert_eq!(
            action,
            Some(CallAction::SaveContact {
                number: "5551234567".into(),
                suggested_name: "Contact 5551234567".into(),
            })
        );
    }

    #[test]
    fn test_gesture_save_falls_back_to_recent_call() {
        let calls = LocalCallControl::in_memory();
        calls.dial("5559876543").unwrap();
        calls.hangup().unwrap();

        let action = resolve(&gesture(GestureLabel::Save), &calls).unwrap().unwrap();
        assert_eq!(action.kind(), ActionKind::SaveContact);
        assert_eq!(action.target(), Some("5559876543"));
    }

    #[test]
    fn test_save_with_nothing_available() {
        let calls = LocalCallControl::in_memory();
        assert_eq!(
            resolve(&gesture(GestureLabel::Save), &calls),
            Err(DispatchError::NoNumberToSave)
        );
    }

    #[test]
    fn test_voice_save_with_spoken_number() {
        let calls = staged("111");
        let action = resolve(&voice(CommandLabel::Save, "555-222-3333"), &calls)
            .unwrap()
            .unwrap();
        assert_eq!(action.target(), Some("5552223333"));
    }

    #[test]
    fn test_voice_call_resolves_contact_then_digits() {
        let calls = LocalCallControl::in_memory();
        calls.add_contact("John Doe", "5551112222").unwrap();

        assert_eq!(
            resolve(&voice(CommandLabel::Call, "John"), &calls).unwrap(),
            Some(CallAction::Dial {
                number: "5551112222".into()
            })
        );
        assert_eq!(
            resolve(&voice(CommandLabel::Call, "5550001111"), &calls).unwrap(),
            Some(CallAction::Dial {
                number: "5550001111".into()
            })
        );
        assert_eq!(
            resolve(&voice(CommandLabel::Call, "555-1234"), &calls).unwrap(),
            Some(CallAction::Dial {
                number: "5551234".into()
            })
        );
        assert_eq!(resolve(&voice(CommandLabel::Call, "Nobody"), &calls).unwrap(), None);
    }

    #[test]
    fn test_call_without_params_dials_staged() {
        let calls = staged("5550009999");
        let expected = Some(CallAction::Dial {
            number: "5550009999".into(),
        });
        assert_eq!(resolve(&voice(CommandLabel::Call, ""), &calls).unwrap(), expected);
        assert_eq!(resolve(&gesture(GestureLabel::Call), &calls).unwrap(), expected);

        let empty = LocalCallControl::in_memory();
        assert_eq!(resolve(&gesture(GestureLabel::Call), &empty).unwrap(), None);
    }

    #[test]
    fn test_delete_hangup_block_and_none() {
        let calls = staged("555");
        assert_eq!(
            resolve(&gesture(GestureLabel::Delete), &calls).unwrap(),
            Some(CallAction::DeleteDigit)
        );
        assert_eq!(
            resolve(&voice(CommandLabel::Delete, ""), &calls).unwrap(),
            Some(CallAction::DeleteDigit)
        );
        assert_eq!(
            resolve(&gesture(GestureLabel::Hangup), &calls).unwrap(),
            Some(CallAction::Hangup)
        );
        assert_eq!(
            resolve(&voice(CommandLabel::Block, ""), &calls).unwrap(),
            Some(CallAction::Block {
                number: Some("555".into())
            })
        );
        assert_eq!(resolve(&gesture(GestureLabel::None), &calls).unwrap(), None);
        assert_eq!(resolve(&voice(CommandLabel::None, ""), &calls).unwrap(), None);
    }

    #[test]
    fn test_block_prefers_active_call() {
        let calls = staged("111");
        calls.dial("5554443333").unwrap();
        assert_eq!(
            resolve(&voice(CommandLabel::Block, ""), &calls).unwrap(),
            Some(CallAction::Block {
                number: Some("5554443333".into())
            })
        );
    }

    #[test]
    fn test_as_phone_number() {
        assert_eq!(as_phone_number("+1 (555) 123-4567").as_deref(), Some("15551234567"));
        assert_eq!(as_phone_number("John"), None);
        assert_eq!(as_phone_number(" - "), None);
        assert_eq!(as_phone_number("5551234").as_deref(), Some("5551234"));
        assert_eq!(as_phone_number("555-1234x"), None);
    }

    fn dispatcher_in(
        mode: InputMode,
        epoch: u64,
        calls: Arc<LocalCallControl>,
    ) -> (
        CommandDispatcher,
        watch::Sender<ModeSnapshot>,
        broadcast::Receiver<DaemonEvent>,
    ) {
        let (mode_tx, mode_rx) = watch::channel(ModeSnapshot { mode, epoch });
        let (event_tx, event_rx) = broadcast::channel(16);
        (CommandDispatcher::new(calls, mode_rx, event_tx), mode_tx, event_rx)
    }

    #[test]
    fn test_dispatcher_performs_and_reports() {
        let calls = Arc::new(staged("5551234"));
        let (dispatcher, _mode_tx, mut events) =
            dispatcher_in(InputMode::GestureActive, 3, Arc::clone(&calls));

        let action = dispatcher.handle(DetectedCommand::gesture(GestureLabel::Delete, 3));
        assert_eq!(action, Some(CallAction::DeleteDigit));
        assert_eq!(calls.staged_number(), "555123");
        assert_eq!(
            events.try_recv().unwrap(),
            DaemonEvent::ActionDispatched {
                action: CallAction::DeleteDigit
            }
        );
    }

    #[test]
    fn test_dispatcher_drops_stale_inputs() {
        let calls = Arc::new(staged("5551234"));
        let (dispatcher, mode_tx, mut events) =
            dispatcher_in(InputMode::GestureActive, 3, Arc::clone(&calls));

        // older epoch
        assert_eq!(dispatcher.handle(DetectedCommand::gesture(GestureLabel::Call, 2)), None);
        // wrong channel for the current mode
        let save = VoiceCommand::bare(CommandLabel::Save);
        assert_eq!(dispatcher.handle(DetectedCommand::voice(save, 3)), None);

        // mode left gesture after the reading was taken
        mode_tx.send_replace(ModeSnapshot {
            mode: InputMode::Idle,
            epoch: 4,
        });
        assert_eq!(dispatcher.handle(DetectedCommand::gesture(GestureLabel::Call, 3)), None);

        assert!(calls.active_call().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_dispatcher_reports_no_number_to_save() {
        let calls = Arc::new(LocalCallControl::in_memory());
        let (dispatcher, _mode_tx, mut events) =
            dispatcher_in(InputMode::VoiceActive, 1, Arc::clone(&calls));

        let save = VoiceCommand::bare(CommandLabel::Save);
        assert_eq!(dispatcher.handle(DetectedCommand::voice(save, 1)), None);
        assert_eq!(events.try_recv().unwrap(), DaemonEvent::NoNumberToSave);
        assert!(calls.contacts().is_empty());
    }

    #[test]
    fn test_dispatcher_reports_rejected_action() {
        let calls = Arc::new(LocalCallControl::in_memory());
        let (dispatcher, _mode_tx, mut events) =
            dispatcher_in(InputMode::GestureActive, 1, Arc::clone(&calls));

        dispatcher.handle(DetectedCommand::gesture(GestureLabel::Hangup, 1));
        assert!(matches!(
            events.try_recv().unwrap(),
            DaemonEvent::ActionFailed {
                action: CallAction::Hangup,
                ..
            }
        ));
    }
}
