//! Command runners: state-machine orchestration of the installer steps.
//!
//! Each command drives its state `provisioning/destroying → terminal`,
//! wraps every step in `(label, in_progress)` / `(label, done)` events,
//! and on failure flips to `failed` and re-raises the error untouched.

mod deploy;
mod destroy;
mod sandbox;

pub use deploy::Deploy;
pub use destroy::Destroy;
pub use sandbox::{DeploySandbox, DestroySandbox};

/// Run one step under its label: `in_progress` before, `done` after, an
/// `error` event (no artificial `done`) and early return on failure.
macro_rules! step {
    ($ctx:expr, $label:expr, $call:expr) => {{
        $ctx.observer
            .on_step($label, $crate::events::StepPhase::InProgress, None);
        match $call.await {
            Ok(value) => {
                $ctx.observer
                    .on_step($label, $crate::events::StepPhase::Done, None);
                value
            }
            Err(err) => {
                $ctx.observer.on_step(
                    $label,
                    $crate::events::StepPhase::Error,
                    Some(&err.to_string()),
                );
                return Err(err);
            }
        }
    }};
}

pub(crate) use step;
