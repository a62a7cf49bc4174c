use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ambit_context::telemetry::init_test_logging;
use ambit_context::{
    context, with_context, with_context_async, ContextError, ContextPropagator, ContextRegistry,
    ContextResult,
};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;

const UNITS: usize = 300;

fn own_propagator() -> ContextPropagator {
    ContextPropagator::new(Arc::new(ContextRegistry::new()))
}

fn read_index() -> ContextResult<usize> {
    let payload = context()?;
    Ok(*payload.downcast_ref::<usize>().expect("usize payload"))
}

fn read_label() -> ContextResult<&'static str> {
    let payload = context()?;
    Ok(*payload.downcast_ref::<&'static str>().expect("label payload"))
}

fn current_thread_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds")
}

#[test]
fn concurrent_threads_see_only_their_own_payload() -> ContextResult<()> {
    init_test_logging();

    let propagator = own_propagator();
    let barrier = Arc::new(Barrier::new(UNITS));

    let handles: Vec<_> = (0..UNITS)
        .map(|index| {
            let propagator = propagator.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> ContextResult<usize> {
                propagator.with_context(index, || -> ContextResult<usize> {
                    // Every unit is registered before any of them reads
                    barrier.wait();
                    let payload = propagator.context()?;
                    Ok(*payload.downcast_ref::<usize>().expect("usize payload"))
                })?
            })
        })
        .collect();

    for (index, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().expect("worker panicked")?, index);
    }

    assert!(propagator.registry().is_empty()?);
    Ok(())
}

#[test]
fn concurrent_threads_on_global_registry() -> ContextResult<()> {
    let handles: Vec<_> = (0..UNITS)
        .map(|index| {
            thread::spawn(move || -> ContextResult<usize> {
                ambit_context::with_context(index, || {
                    thread::yield_now();
                    read_index()
                })?
            })
        })
        .collect();

    for (index, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().expect("worker panicked")?, index);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_tasks_see_only_their_own_payload() -> ContextResult<()> {
    init_test_logging();

    let propagator = own_propagator();

    let tasks: Vec<_> = (0..UNITS)
        .map(|index| {
            let propagator = propagator.clone();
            tokio::spawn(async move {
                let inner = propagator.clone();
                propagator
                    .with_context_async(index, async move {
                        // Hop across worker threads between lookups
                        let before = inner.context()?;
                        tokio::task::yield_now().await;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        let after = inner.context()?;

                        assert!(Arc::ptr_eq(&before, &after));
                        Ok::<_, ContextError>(*after.downcast_ref::<usize>().expect("usize payload"))
                    })
                    .await?
            })
        })
        .collect();

    for (index, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.expect("task panicked")?, index);
    }

    assert!(propagator.registry().is_empty()?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_registration_inside_async_task() -> ContextResult<()> {
    let tasks: Vec<_> = (0..64usize)
        .map(|index| {
            tokio::spawn(async move {
                let outer = with_context_async(index, async move {
                    tokio::task::yield_now().await;
                    let nested = ambit_context::with_context(index + 1000, read_index)??;
                    tokio::task::yield_now().await;
                    Ok::<_, ContextError>((nested, read_index()?))
                })
                .await??;
                Ok::<_, ContextError>(outer)
            })
        })
        .collect();

    for (index, task) in tasks.into_iter().enumerate() {
        let (nested, after) = task.await.expect("task panicked")?;
        assert_eq!(nested, index + 1000);
        assert_eq!(after, index);
    }
    Ok(())
}

#[tokio::test]
async fn spawned_tasks_do_not_inherit_context() -> ContextResult<()> {
    let propagator = own_propagator();

    let inner = propagator.clone();
    let spawned = propagator
        .with_context_async("parent", async move {
            assert!(inner.context().is_ok());
            let child = inner.clone();
            tokio::spawn(async move { child.context() })
                .await
                .expect("child task panicked")
        })
        .await?;

    assert_eq!(spawned.unwrap_err(), ContextError::NotInContext);
    Ok(())
}

#[tokio::test]
async fn dropped_async_scope_removes_entry() -> ContextResult<()> {
    let propagator = own_propagator();
    let registry = Arc::clone(propagator.registry());

    let observer = Arc::clone(&registry);
    let scope = propagator.with_context_async("abandoned", async move {
        assert_eq!(observer.len().expect("registry readable"), 1);
        std::future::pending::<()>().await;
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(20), scope).await;
    assert!(timed_out.is_err());
    assert!(registry.is_empty()?);
    Ok(())
}

#[test]
fn task_spawned_under_sync_frame_does_not_see_it() -> ContextResult<()> {
    let rt = current_thread_runtime();

    let spawned = with_context("sync-frame", || {
        rt.block_on(async { tokio::spawn(async { read_label() }).await })
    })?
    .expect("spawned task panicked");

    assert_eq!(spawned.unwrap_err(), ContextError::NotInContext);
    Ok(())
}

#[test]
fn async_scope_resumed_under_sync_frame_keeps_its_payload() -> ContextResult<()> {
    let rt = current_thread_runtime();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (resume_tx, resume_rx) = oneshot::channel::<()>();

    let task = rt.spawn(with_context_async("task-a", async move {
        let before = read_label();
        let _ = ready_tx.send(());
        let _ = resume_rx.await;
        (before, read_label())
    }));

    // First poll happens outside any synchronous frame
    rt.block_on(ready_rx).expect("task reached its first await");

    let (before, after) = with_context("sync-s", || -> ContextResult<_> {
        assert_eq!(read_label()?, "sync-s");
        let _ = resume_tx.send(());
        let outcome = rt.block_on(task).expect("task panicked")?;
        assert_eq!(read_label()?, "sync-s");
        Ok(outcome)
    })??;

    assert_eq!(before?, "task-a");
    assert_eq!(after?, "task-a");
    Ok(())
}
