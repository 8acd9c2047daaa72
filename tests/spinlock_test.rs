//! SpinLock and task-switching critical section tests.

mod common;

use common::serial;
use kaos_tasking::arch::interrupts;
use kaos_tasking::sync::preempt;
use kaos_tasking::sync::spinlock::SpinLock;

#[test]
fn test_spinlock_basic_mutation() {
    static LOCK: SpinLock<usize> = SpinLock::new(0);
    let _guard = serial();

    {
        let mut guard = LOCK.lock();
        *guard += 1;
    }

    let guard = LOCK.lock();
    assert!(*guard == 1, "spinlock should protect shared state");
    assert!(LOCK.is_locked());
    drop(guard);
    assert!(!LOCK.is_locked(), "dropping the guard must release the lock");
}

/// Contract: spinlock preserves interrupt state when disabled.
#[test]
fn test_spinlock_preserves_interrupt_state_when_disabled() {
    static LOCK: SpinLock<usize> = SpinLock::new(0);
    let _guard = serial();

    interrupts::disable();
    assert!(
        !interrupts::are_enabled(),
        "interrupts should be disabled for this test"
    );

    {
        let mut guard = LOCK.lock();
        *guard += 1;
    }

    assert!(
        !interrupts::are_enabled(),
        "spinlock should not enable interrupts when they were disabled"
    );
}

/// Contract: spinlock masks interrupts while held and restores them after.
#[test]
fn test_spinlock_restores_interrupt_state_when_enabled() {
    static LOCK: SpinLock<usize> = SpinLock::new(0);
    let _guard = serial();

    interrupts::enable();
    {
        let _held = LOCK.lock();
        assert!(
            !interrupts::are_enabled(),
            "interrupts must be masked while the lock is held"
        );
    }
    assert!(
        interrupts::are_enabled(),
        "spinlock should restore enabled interrupts"
    );
    interrupts::disable();
}

#[test]
fn test_spinlock_disables_task_switching_while_held() {
    static LOCK: SpinLock<()> = SpinLock::new(());
    let _guard = serial();

    preempt::enable();
    {
        let _held = LOCK.lock();
        assert!(!preempt::is_enabled(), "holding a spinlock is a critical section");
    }
    assert!(preempt::is_enabled(), "switching must be re-enabled on release");

    preempt::disable();
    {
        let _held = LOCK.lock();
    }
    assert!(
        !preempt::is_enabled(),
        "releasing must not enable switching that was off before"
    );
}

#[test]
fn test_nested_guards_restore_outer_state() {
    static OUTER: SpinLock<u32> = SpinLock::new(0);
    static INNER: SpinLock<u32> = SpinLock::new(0);
    let _guard = serial();

    preempt::enable();
    interrupts::enable();
    {
        let mut outer = OUTER.lock();
        {
            let mut inner = INNER.lock();
            *inner += 1;
        }
        assert!(
            !preempt::is_enabled() && !interrupts::are_enabled(),
            "inner release must keep the outer critical section"
        );
        *outer += 1;
    }
    assert!(preempt::is_enabled() && interrupts::are_enabled());

    interrupts::disable();
}

#[test]
fn test_preempt_guard_nests() {
    let _guard = serial();

    preempt::enable();
    let outer = preempt::guard();
    let inner = preempt::guard();
    drop(inner);
    assert!(!preempt::is_enabled(), "inner guard must not re-enable switching");
    drop(outer);
    assert!(preempt::is_enabled());
}
