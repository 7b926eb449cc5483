//! Human-in-the-loop consent mediation.
//!
//! - [`surface`]: the approval-surface registry (per-kind singletons) and
//!   the [`Prompter`](surface::Prompter) trait the rendering layer plugs
//!   into.
//! - [`coordinator`]: the consumer loop over proxy-server events, driving
//!   each request through its approval flow.

pub mod coordinator;
pub mod surface;

pub use coordinator::{ConsentCoordinator, SupportConfig};
pub use surface::{Prompter, SurfaceKind, SurfaceOutcome, SurfaceRegistry};
