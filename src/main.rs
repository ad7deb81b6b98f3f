//! # taskcore Demonstration Firmware
//!
//! Shows an interrupt handing work to tasks through the kernel objects:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | main | 4 | pends the demo interrupt, then waits for the round to finish |
//! | `producer` | 3 | waits for the interrupt's event, bumps the counter under the mutex |
//! | `consumer` | 2 | waits for the producer, reads the counter, reports back to main |
//!
//! ## One round
//!
//! 1. main pends IRQ line [`DEMO_IRQ`] and blocks on `done`.
//! 2. The interrupt handler signals the `tick` event without rescheduling;
//!    the producer is made ready and runs once main has blocked.
//! 3. The producer updates the counter, signals `items` and blocks on
//!    `tick` again, letting the consumer run.
//! 4. The consumer reads the counter and signals `done` with rescheduling,
//!    so main (the highest priority) takes over at once.
//!
//! Build with `--features firmware` for a `thumbv7em-none-eabi` target.

#![no_std]
#![no_main]

use core::cell::Cell;
use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;
use cortex_m_rt::{entry, exception};
use embedded_alloc::LlffHeap as Heap;
use panic_halt as _;

use taskcore::{
    event, irq, kernel, mutex, semaphore, EventHandle, KernelConfig, MutexHandle, ResetMode,
    SemaphoreHandle,
};

#[global_allocator]
static HEAP: Heap = Heap::empty();

const HEAP_SIZE: usize = 32 * 1024;

/// Interrupt line pended by main to start a round.
const DEMO_IRQ: u16 = 5;

// ---------------------------------------------------------------------------
// Shared demo state
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Objects {
    tick: EventHandle,
    guard: MutexHandle,
    items: SemaphoreHandle,
    done: SemaphoreHandle,
}

static OBJECTS: critical_section::Mutex<Cell<Option<Objects>>> =
    critical_section::Mutex::new(Cell::new(None));

/// Written only while holding `guard`.
static COUNTER: AtomicU32 = AtomicU32::new(0);

static LAST_SEEN: AtomicU32 = AtomicU32::new(0);

fn objects() -> Objects {
    match critical_section::with(|cs| OBJECTS.borrow(cs).get()) {
        Some(objects) => objects,
        None => kernel::fatal("demo objects missing"),
    }
}

#[derive(Clone, Copy)]
struct Line(u16);

// SAFETY: DEMO_IRQ exists on every Cortex-M4 part.
unsafe impl InterruptNumber for Line {
    fn number(self) -> u16 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

fn producer(_: usize) {
    let objects = objects();
    while event::wait(objects.tick).is_ok() {
        if mutex::lock(objects.guard).is_err() {
            break;
        }
        COUNTER.fetch_add(1, Ordering::Relaxed);
        let _ = mutex::unlock(objects.guard);
        let _ = semaphore::signal(objects.items, 1, true);
    }
}

fn consumer(_: usize) {
    let objects = objects();
    while semaphore::wait(objects.items).is_ok() {
        if mutex::lock(objects.guard).is_err() {
            break;
        }
        LAST_SEEN.store(COUNTER.load(Ordering::Relaxed), Ordering::Relaxed);
        let _ = mutex::unlock(objects.guard);
        let _ = semaphore::signal(objects.done, 1, true);
    }
}

// ---------------------------------------------------------------------------
// Vector table glue
// ---------------------------------------------------------------------------

#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    if let Ok(line) = u16::try_from(irqn) {
        irq::dispatch(line);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn create_objects() -> Result<Objects, taskcore::CreateError> {
    Ok(Objects {
        tick: event::create(ResetMode::OneShot)?,
        guard: mutex::create()?,
        items: semaphore::create(0)?,
        done: semaphore::create(0)?,
    })
}

#[entry]
fn main() -> ! {
    {
        static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
        // SAFETY: runs once, before the first allocation.
        unsafe { HEAP.init(addr_of_mut!(HEAP_MEM) as usize, HEAP_SIZE) }
    }

    if kernel::init(KernelConfig::with_main_priority(4)).is_err() {
        kernel::fatal("kernel init failed");
    }
    let Ok(objects) = create_objects() else {
        kernel::fatal("cannot create demo objects");
    };
    critical_section::with(|cs| OBJECTS.borrow(cs).set(Some(objects)));

    if kernel::create_task(0, 3, producer, 0).is_err()
        || kernel::create_task(0, 2, consumer, 0).is_err()
    {
        kernel::fatal("cannot create demo tasks");
    }
    if event::bind_interrupt(objects.tick, DEMO_IRQ, 0x80).is_err() {
        kernel::fatal("cannot bind demo interrupt");
    }

    loop {
        cortex_m::asm::delay(1_000_000);
        NVIC::pend(Line(DEMO_IRQ));
        if semaphore::wait(objects.done).is_err() {
            kernel::fatal("round semaphore deleted");
        }
    }
}
