//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler. Exactly one
//! port is compiled in and re-exported as [`port`]:
//!
//! - `cortex_m4` on bare-metal ARM targets
//! - `hosted` everywhere an operating system exists (tests, simulation)
//!
//! Both expose the same items: `TaskContext` (with `running` and
//! `new_task`), `switch_context`, `in_task_context`, `wait_for_interrupt`,
//! `halt`, `current_core`, `enable_irq`, `disable_irq` and
//! `is_irq_enabled`.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4 as port;

#[cfg(not(target_os = "none"))]
pub mod hosted;
#[cfg(not(target_os = "none"))]
pub use hosted as port;

#[cfg(all(target_os = "none", not(target_arch = "arm")))]
compile_error!("taskcore has no port for this bare-metal architecture");
