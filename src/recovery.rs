//! Device-loss recovery as a pure state machine.
//!
//! [`Recovery::handle`] consumes one [`Event`] and returns the [`Action`]s the
//! owner has to carry out, in order. It never touches a surface or a context
//! itself, which keeps every transition testable without a device.

use crate::gpu::SignalKind;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Active,
    Lost,
    Recovering,
}

/// Inputs to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The device went away. `animating` is the clock state at that moment.
    ContextLost { animating: bool },
    ContextRestored,
    /// A fresh scene was built after a restore.
    Rebuilt { has_media: bool },
    RebuildFailed,
}

/// Work requested from the owner of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Claim the signal so the platform keeps the surface restorable.
    Claim(SignalKind),
    Subscribe(SignalKind),
    Unsubscribe(SignalKind),
    StopAnimation,
    /// Drop the scene and its context; media and dimensions stay.
    ReleaseScene,
    /// Rebuild from the retained effect list and dimensions, then report
    /// [`Event::Rebuilt`] or [`Event::RebuildFailed`].
    Rebuild,
    ReapplyMedia,
    ResumeAnimation,
}

#[derive(Debug)]
pub struct Recovery {
    state: RecoveryState,
    resume_animation: bool,
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Recovery {
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Active,
            resume_animation: false,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// True when animation will be resumed once the scene is rebuilt.
    pub fn resumes_animation(&self) -> bool {
        self.resume_animation
    }

    /// Asks for animation to resume after recovery, e.g. because playback
    /// was requested while the device was gone.
    pub fn request_resume(&mut self) {
        if self.state != RecoveryState::Active {
            self.resume_animation = true;
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        use Action::*;
        use RecoveryState::*;

        let (next, actions) = match (self.state, event) {
            (Active, Event::ContextLost { animating }) => {
                self.resume_animation = animating;
                (
                    Lost,
                    // subscribe first: a surface may restore from within the claim
                    vec![
                        Subscribe(SignalKind::ContextRestored),
                        Claim(SignalKind::ContextLost),
                        StopAnimation,
                        ReleaseScene,
                    ],
                )
            }
            (Lost, Event::ContextRestored) => (
                Recovering,
                vec![
                    Claim(SignalKind::ContextRestored),
                    Unsubscribe(SignalKind::ContextRestored),
                    Rebuild,
                ],
            ),
            (Recovering, Event::Rebuilt { has_media }) => {
                let mut actions = Vec::new();
                if has_media {
                    actions.push(ReapplyMedia);
                }
                if std::mem::take(&mut self.resume_animation) {
                    actions.push(ResumeAnimation);
                }
                (Active, actions)
            }
            // a later restore signal retries the rebuild
            (Recovering, Event::RebuildFailed) => (Lost, vec![Subscribe(SignalKind::ContextRestored)]),
            (state, event) => {
                warn!(?state, ?event, "Ignoring recovery event");
                return Vec::new();
            }
        };

        debug!(from = ?self.state, to = ?next, ?event, "Recovery transition");
        self.state = next;
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_releases_and_waits_for_restore() {
        let mut recovery = Recovery::new();
        let actions = recovery.handle(Event::ContextLost { animating: true });

        assert_eq!(recovery.state(), RecoveryState::Lost);
        assert_eq!(
            actions,
            vec![
                Action::Subscribe(SignalKind::ContextRestored),
                Action::Claim(SignalKind::ContextLost),
                Action::StopAnimation,
                Action::ReleaseScene,
            ]
        );
        assert!(recovery.resumes_animation());
    }

    #[test]
    fn test_full_cycle_resumes_animation_and_media() {
        let mut recovery = Recovery::new();
        recovery.handle(Event::ContextLost { animating: true });

        let actions = recovery.handle(Event::ContextRestored);
        assert_eq!(recovery.state(), RecoveryState::Recovering);
        assert_eq!(actions.last(), Some(&Action::Rebuild));

        let actions = recovery.handle(Event::Rebuilt { has_media: true });
        assert_eq!(recovery.state(), RecoveryState::Active);
        assert_eq!(actions, vec![Action::ReapplyMedia, Action::ResumeAnimation]);
        assert!(!recovery.resumes_animation());
    }

    #[test]
    fn test_idle_instance_stays_idle_after_restore() {
        let mut recovery = Recovery::new();
        recovery.handle(Event::ContextLost { animating: false });
        recovery.handle(Event::ContextRestored);

        let actions = recovery.handle(Event::Rebuilt { has_media: false });
        assert!(actions.is_empty());
    }

    #[test]
    fn test_play_while_lost_resumes_later() {
        let mut recovery = Recovery::new();
        recovery.request_resume();
        assert!(!recovery.resumes_animation());

        recovery.handle(Event::ContextLost { animating: false });
        recovery.request_resume();
        recovery.handle(Event::ContextRestored);
        let actions = recovery.handle(Event::Rebuilt { has_media: false });
        assert_eq!(actions, vec![Action::ResumeAnimation]);
    }

    #[test]
    fn test_failed_rebuild_returns_to_lost() {
        let mut recovery = Recovery::new();
        recovery.handle(Event::ContextLost { animating: true });
        recovery.handle(Event::ContextRestored);

        let actions = recovery.handle(Event::RebuildFailed);
        assert_eq!(recovery.state(), RecoveryState::Lost);
        assert_eq!(actions, vec![Action::Subscribe(SignalKind::ContextRestored)]);
        assert!(recovery.resumes_animation());
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        let mut recovery = Recovery::new();
        assert!(recovery.handle(Event::ContextRestored).is_empty());
        assert_eq!(recovery.state(), RecoveryState::Active);

        recovery.handle(Event::ContextLost { animating: false });
        assert!(recovery.handle(Event::ContextLost { animating: true }).is_empty());
        assert!(!recovery.resumes_animation());
    }
}
