//! Concurrent binding and creation behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use polyctx::{
    Context, ContextConfig, ContextError, MemoryHostEnvironment, StaticRuntimeBindings, registry,
};

fn setup() -> Arc<MemoryHostEnvironment> {
    let _ = env_logger::builder().is_test(true).try_init();
    polyctx::try_initialize_process(StaticRuntimeBindings::minimal());
    MemoryHostEnvironment::new(vec![])
}

#[test]
fn a_context_may_have_many_threads_bound_concurrently() {
    let host = setup();
    let ctx = Context::create(Some(ContextConfig::exclusive()), host).unwrap();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let ctx = ctx.clone();
        workers.push(std::thread::spawn(move || {
            registry::bind(&ctx);
            // Whichever path answers, it must be this context or another
            // test's; the binding contract only covers this thread's slot.
            assert!(registry::is_bound());
            ctx.state().unwrap().environments.set("touched", 1.into());
            registry::unbind();
            assert!(!registry::is_bound());
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    ctx.destroy().unwrap();
}

#[test]
fn racing_shared_write_creations_admit_exactly_one_winner() {
    let host = setup();
    let parent = Context::create(Some(ContextConfig::exclusive()), host.clone()).unwrap();
    let successes = Arc::new(AtomicUsize::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));

    let mut racers = Vec::new();
    for _ in 0..8 {
        let host = host.clone();
        let parent_id = parent.id();
        let successes = successes.clone();
        let rejections = rejections.clone();
        racers.push(std::thread::spawn(move || {
            match Context::create(Some(ContextConfig::shared_write(parent_id)), host) {
                Ok(child) => {
                    successes.fetch_add(1, Ordering::Relaxed);
                    child.destroy().unwrap();
                }
                Err(ContextError::SharedWriteChildExists) => {
                    rejections.fetch_add(1, Ordering::Relaxed);
                }
                Err(other) => panic!("unexpected creation failure: {other}"),
            }
        }));
    }
    for racer in racers {
        racer.join().unwrap();
    }

    // Children destroy immediately, so several may win in sequence, but
    // every attempt either won cleanly or saw the structural error.
    assert_eq!(
        successes.load(Ordering::Relaxed) + rejections.load(Ordering::Relaxed),
        8
    );
    assert!(successes.load(Ordering::Relaxed) >= 1);
    assert_eq!(parent.shared_child(), None);

    parent.destroy().unwrap();
}
