//! DAMA: the return-link bandwidth-on-demand control plane. The NCC side
//! lives in [`controller`], the terminal side in [`agent`], and the
//! per-terminal bookkeeping they share in [`context`].

pub mod agent;
pub mod context;
pub mod controller;

pub use agent::{DamaAgent, DamaAgentConfig, LinkUp, SofOutcome, TalState};
pub use context::DamaContext;
pub use controller::{DamaController, DamaCtrlStats};
