mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{boot, boot_with, share, shared, Log};
use taskcore::config::MAX_PRIORITY;
use taskcore::{kernel, semaphore, CreateError, KError, KernelConfig, SemaphoreHandle};

struct Race {
    done: SemaphoreHandle,
    remaining: AtomicUsize,
    order: Log<u32>,
}

struct Entrant {
    race: &'static Race,
    tag: u32,
}

fn record_and_exit(arg: usize) {
    let entrant: &Entrant = shared(arg);
    entrant.race.order.push(entrant.tag);
    if entrant.race.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
        semaphore::signal(entrant.race.done, 1, false).unwrap();
    }
}

#[test]
fn test_highest_priority_runs_first_fifo_among_equals() {
    let booted = boot(6);
    let race: &'static Race = shared(share(Race {
        done: semaphore::create(0).unwrap(),
        remaining: AtomicUsize::new(4),
        order: Log::new(),
    }));

    for (tag, priority) in [(1, 5), (2, 2), (3, 5), (4, 4)] {
        let arg = share(Entrant { race, tag });
        kernel::create_task(0, priority, record_and_exit, arg).unwrap();
    }
    // Creation never switches.
    assert!(race.order.snapshot().is_empty());

    semaphore::wait(race.done).unwrap();
    assert_eq!(race.order.snapshot(), [1, 3, 4, 2]);
    assert_eq!(kernel::current_task(), booted.main);

    let stats = kernel::stats();
    assert_eq!(stats.live_tasks, 2);
    // The last task to exit is only reaped by the next scheduler call.
    assert_eq!(stats.tasks.in_use, 3);
    kernel::yield_task();
    assert_eq!(kernel::stats().tasks.in_use, 2);
}

fn never_runs(_: usize) {
    unreachable!("task was never meant to be scheduled");
}

#[test]
fn test_invalid_priority_allocates_nothing() {
    let _booted = boot(3);
    let before = kernel::stats();

    assert_eq!(
        kernel::create_task(0, MAX_PRIORITY + 1, never_runs, 0),
        Err(CreateError::InvalidPriority)
    );
    assert_eq!(
        kernel::create_task(0, u8::MAX, never_runs, 0),
        Err(CreateError::InvalidPriority)
    );
    assert_eq!(kernel::stats(), before);

    assert_eq!(
        kernel::init(KernelConfig::with_main_priority(MAX_PRIORITY + 1)),
        Err(CreateError::InvalidPriority)
    );
    assert_eq!(kernel::stats(), before);
}

#[test]
fn test_task_arena_exhaustion_is_reported() {
    let config = KernelConfig {
        max_tasks: 4,
        ..KernelConfig::with_main_priority(1)
    };
    let _booted = boot_with(config);

    assert!(kernel::create_task(0, 0, never_runs, 0).is_ok());
    assert!(kernel::create_task(0, 0, never_runs, 0).is_ok());
    assert_eq!(
        kernel::create_task(0, 0, never_runs, 0),
        Err(CreateError::OutOfMemory)
    );
    let stats = kernel::stats();
    assert_eq!(stats.tasks.in_use, 4);
    assert_eq!(stats.tasks.capacity, 4);
    assert_eq!(stats.live_tasks, 4);
}

#[test]
fn test_oversized_stack_is_reported() {
    let _booted = boot(3);
    let before = kernel::stats();

    assert_eq!(
        kernel::create_task(usize::MAX, 2, never_runs, 0),
        Err(CreateError::OutOfMemory)
    );
    assert_eq!(
        kernel::create_task(usize::MAX - 3, 2, never_runs, 0),
        Err(CreateError::OutOfMemory)
    );
    assert_eq!(kernel::stats(), before);
}

static RUNS: AtomicUsize = AtomicUsize::new(0);

fn count_run(_: usize) {
    RUNS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_exited_tasks_are_reaped_and_slots_reused() {
    let config = KernelConfig {
        max_tasks: 3,
        ..KernelConfig::with_main_priority(3)
    };
    let _booted = boot_with(config);
    RUNS.store(0, Ordering::SeqCst);

    let mut previous = None;
    for round in 1..=20 {
        let worker = kernel::create_task(256, 5, count_run, 0).unwrap();
        assert_eq!(kernel::task_priority(worker), Ok(5));
        if let Some(previous) = previous {
            assert_ne!(worker, previous);
            assert_eq!(kernel::task_priority(previous), Err(KError::InvalidHandle));
        }

        // Runs the worker, which exits straight away.
        kernel::yield_task();
        assert_eq!(RUNS.load(Ordering::SeqCst), round);
        // Reaps it.
        kernel::yield_task();
        assert_eq!(kernel::stats().tasks.in_use, 2);
        previous = Some(worker);
    }
    assert_eq!(kernel::stats().live_tasks, 2);
}

static SEEN_ARG: AtomicUsize = AtomicUsize::new(0);

fn store_arg(arg: usize) {
    SEEN_ARG.store(arg, Ordering::SeqCst);
}

#[test]
fn test_entry_receives_argument() {
    let _booted = boot(1);
    SEEN_ARG.store(0, Ordering::SeqCst);

    kernel::create_task(0, 2, store_arg, 0xBEEF).unwrap();
    kernel::yield_task();
    assert_eq!(SEEN_ARG.load(Ordering::SeqCst), 0xBEEF);
}

struct Turn {
    log: &'static Log<char>,
    name: char,
}

fn take_turns(arg: usize) {
    let turn: &Turn = shared(arg);
    for _ in 0..3 {
        turn.log.push(turn.name);
        kernel::yield_task();
    }
}

#[test]
fn test_yield_round_robins_equal_priorities() {
    let _booted = boot(3);
    let log: &'static Log<char> = shared(share(Log::<char>::new()));

    for name in ['a', 'b'] {
        kernel::create_task(0, 3, take_turns, share(Turn { log, name })).unwrap();
    }
    while kernel::stats().live_tasks > 2 {
        kernel::yield_task();
    }
    assert_eq!(log.snapshot(), ['a', 'b', 'a', 'b', 'a', 'b']);
}

#[test]
fn test_yield_does_not_run_lower_priorities() {
    let _booted = boot(4);
    RUNS.store(0, Ordering::SeqCst);

    kernel::create_task(0, 3, count_run, 0).unwrap();
    for _ in 0..5 {
        kernel::yield_task();
    }
    assert_eq!(RUNS.load(Ordering::SeqCst), 0);
}
