//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Up`, `Down`     |
//! | `plan`   | `Plan`           |
//! | `render` | `Render`         |
//! | `config` | `Config`         |

pub mod config;
pub mod plan;
pub mod render;
pub mod run;

pub use config::cmd_config;
pub use plan::cmd_plan;
pub use render::cmd_render;
pub use run::{cmd_down, cmd_up};
