//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Tasks switch cooperatively: a task gives up the CPU by calling
//! [`switch_context`], which saves its callee-saved registers on its own
//! stack and restores those of the next task. No exception is involved, so
//! every task runs in Thread mode on the main stack pointer.
//!
//! ## Saved frame
//!
//! ```text
//!   high address
//!     LR      return address (task_start for a new task)
//!     R12
//!     R11 ... R4
//!   low address   <- saved SP stored in TaskContext
//! ```
//!
//! Ten words keep the stack 8-byte aligned (AAPCS). R0 carries the value
//! handed across the switch and comes back as the return value in the
//! resumed task. The port assumes a soft-float ABI; FPU registers are not
//! saved.
//!
//! ## Interrupt Priorities
//!
//! NVIC priorities are written as given: a numerically smaller value is
//! more urgent. This is the opposite of task priorities.

use core::arch::global_asm;
use core::ptr::addr_of_mut;

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::scb::VectActive;
use cortex_m::peripheral::{NVIC, SCB};

use crate::config::STACK_ALIGN;
use crate::task::Stack;

/// Words in a saved frame: R4-R12 and LR.
const FRAME_WORDS: usize = 10;

// ---------------------------------------------------------------------------
// Context switch
// ---------------------------------------------------------------------------

global_asm!(
    ".section .text.taskcore_switch_context,\"ax\",%progbits",
    ".global taskcore_switch_context",
    ".type taskcore_switch_context,%function",
    ".thumb_func",
    "taskcore_switch_context:",
    // r0 = value, r1 = &from.sp, r2 = to.sp
    "push {{r4-r12, lr}}",
    "mov r3, sp",
    "str r3, [r1]",
    "mov sp, r2",
    "pop {{r4-r12, lr}}",
    "bx lr",
    ".size taskcore_switch_context, . - taskcore_switch_context",
);

extern "C" {
    fn taskcore_switch_context(value: usize, from_sp: *mut usize, to_sp: usize) -> usize;
}

/// Saved stack pointer of a task that is not running.
#[repr(C)]
#[derive(Debug)]
pub struct TaskContext {
    sp: usize,
}

impl TaskContext {
    /// Context of the boot flow of control. Filled in on its first switch out.
    pub fn running() -> Self {
        Self { sp: 0 }
    }

    /// Context whose first resumption enters [`task_start`] on `stack`.
    pub fn new_task(stack: &Stack) -> Self {
        let top = stack.top().as_ptr() as usize & !(STACK_ALIGN - 1);
        let frame = (top - FRAME_WORDS * 4) as *mut u32;
        // SAFETY: the frame lies within the freshly allocated stack.
        unsafe {
            for word in 0..FRAME_WORDS - 1 {
                frame.add(word).write(0);
            }
            frame.add(FRAME_WORDS - 1).write(task_start as usize as u32);
        }
        Self { sp: frame as usize }
    }
}

/// Save the running task into `from`, resume `to`, hand it `value`.
/// Returns when some later switch resumes `from`.
///
/// # Safety
/// `to` must hold a frame saved by a previous switch or built by
/// [`TaskContext::new_task`], and its stack must still be allocated.
/// Interrupts may be enabled; the kernel lock must not be held.
pub unsafe fn switch_context(value: usize, from: *mut TaskContext, to: *const TaskContext) -> usize {
    taskcore_switch_context(value, addr_of_mut!((*from).sp), (*to).sp)
}

/// First code a new task executes.
extern "C" fn task_start() -> ! {
    crate::kernel::run_current_task()
}

// ---------------------------------------------------------------------------
// Processor state
// ---------------------------------------------------------------------------

/// Tasks run in Thread mode; handlers must never enter the scheduler.
pub fn in_task_context() -> bool {
    SCB::vect_active() == VectActive::ThreadMode
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Stop the core for good.
pub fn halt(_reason: &str) -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// One run-queue set is modeled, so every task lives on core 0.
pub fn current_core() -> u8 {
    0
}

// ---------------------------------------------------------------------------
// NVIC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct IrqLine(u16);

// SAFETY: lines are bounds-checked against IRQ_LINES by the irq module.
unsafe impl InterruptNumber for IrqLine {
    fn number(self) -> u16 {
        self.0
    }
}

/// Set the NVIC priority of `line` and unmask it.
pub fn enable_irq(line: u16, priority: u8) {
    // SAFETY: only the priority and enable registers of `line` are touched,
    // from inside the kernel's interrupt table update.
    unsafe {
        let mut peripherals = cortex_m::Peripherals::steal();
        peripherals.NVIC.set_priority(IrqLine(line), priority);
        NVIC::unmask(IrqLine(line));
    }
}

pub fn disable_irq(line: u16) {
    NVIC::mask(IrqLine(line));
}

pub fn is_irq_enabled(line: u16) -> bool {
    NVIC::is_enabled(IrqLine(line))
}
