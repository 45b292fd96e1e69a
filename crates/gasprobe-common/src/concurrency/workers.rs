use std::collections::VecDeque;

use futures_core::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::concurrency::Error;

/// Wraps the given block into a `BoxFuture` task that can be registered in the
/// [`ConcurrentExecutor`]. The environment is moved into the block.
#[macro_export]
macro_rules! task {
    (|$n: ident| $e: block) => {
        move |$n| { Box::pin(async move $e) }
    };
    (|_| $e: block) => {
        move |_| { Box::pin(async move $e) }
    };
}

type Task<C, S> = Box<dyn FnOnce(C) -> BoxFuture<'static, S> + Send + Sync>;

/// Bounded worker pool. At most `n_workers` tasks run at the same time, the others
/// wait in a FIFO queue and are started as soon as a worker frees up.
///
/// ```rust
///  use gasprobe_common::concurrency::ConcurrentExecutor;
///  use gasprobe_common::task;
///
///  let mut executor = ConcurrentExecutor::new((), 8);
///  executor.register(task!(|_| { 1 }));
///  executor.register(task!(|_| { 1 }));
///
///  let result = executor.execute().await;
/// ```
pub struct ConcurrentExecutor<C, S> {
    context: C,
    n_workers: usize,

    workers: JoinSet<S>,
    queue: VecDeque<Task<C, S>>,
}

impl<C: Clone, S: 'static + Send + Sync> ConcurrentExecutor<C, S> {
    /// Create a new executor running at most `n_workers` tasks in parallel. The context
    /// is cloned into each task.
    pub fn new(context: C, n_workers: usize) -> Self {
        Self {
            context,
            n_workers,

            workers: JoinSet::new(),
            queue: VecDeque::new(),
        }
    }

    /// Register a new task. The task starts immediately when a worker is available,
    /// otherwise it is queued behind the tasks registered before it.
    pub fn register<F>(&mut self, task: F) -> &mut Self
    where
        F: 'static + FnOnce(C) -> BoxFuture<'static, S>,
        F: Send + Sync,
    {
        if self.workers.len() >= self.n_workers {
            self.queue.push_back(Box::new(task));
        } else {
            self.workers.spawn(task(self.context.clone()).in_current_span());
        }

        self
    }

    /// Number of tasks that are either running or waiting for a worker.
    pub fn len(&self) -> usize {
        self.workers.len() + self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for a task to complete and return its result, then start the next queued task.
    /// Errors
    ///  - [`Error::Join`] indicates that the task could not be joined properly
    ///  - [`Error::NoWorkers`] indicates that n_workers was set to 0
    pub async fn next(&mut self) -> Option<Result<S, Error>> {
        if self.n_workers == 0 {
            return Some(Err(Error::NoWorkers));
        }

        let value = match self.workers.join_next().await {
            Some(Ok(value)) => Some(Ok(value)),
            None => None,
            Some(Err(e)) => Some(Err(Error::Join(e))),
        };

        if let Some(task) = self.queue.pop_front() {
            self.workers.spawn(task(self.context.clone()).in_current_span());
        }

        value
    }

    /// Execute all the registered tasks and return the results in completion order.
    pub async fn execute(&mut self) -> Result<Vec<S>, Error> {
        let mut results = Vec::with_capacity(self.len());
        while let Some(value) = self.next().await {
            results.push(value?)
        }

        Ok(results)
    }

    /// Results of the tasks that already completed, without waiting and without starting
    /// queued tasks.
    pub fn finished(&mut self) -> Vec<Result<S, Error>> {
        let mut finished = Vec::new();
        while let Some(joined) = self.workers.try_join_next() {
            finished.push(joined.map_err(Error::Join));
        }

        finished
    }

    /// Abort the running tasks and drop the queued ones. Returns how many tasks were discarded.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.len();

        self.queue.clear();
        self.workers.abort_all();

        discarded
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::concurrency::ConcurrentExecutor;

    #[tokio::test]
    pub async fn empty_executor() {
        let mut executor = ConcurrentExecutor::new((), 5);
        let values: Vec<u8> = executor.execute().await.unwrap();

        assert!(values.is_empty());
    }

    #[tokio::test]
    pub async fn no_workers_executor() {
        let mut executor = ConcurrentExecutor::new((), 0);
        executor.register(task!(|_| { 5 }));

        let result = executor.execute().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    pub async fn less_workers_than_task() {
        let mut executor = ConcurrentExecutor::new((), 3);
        for i in 0..8 {
            executor.register(task!(|_| { i }));
        }

        assert_eq!(executor.len(), 8);

        let mut values = executor.execute().await.unwrap();
        values.sort();

        assert_eq!(values, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(executor.is_empty());
    }

    #[tokio::test]
    pub async fn single_worker_runs_queue_in_registration_order() {
        let mut executor = ConcurrentExecutor::new((), 1);
        for i in 0..5 {
            executor.register(task!(|_| { i }));
        }

        let values = executor.execute().await.unwrap();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    pub async fn context_is_passed_to_each_task() {
        let mut executor = ConcurrentExecutor::new(10u64, 2);
        executor.register(task!(|base| { base + 1 }));
        executor.register(task!(|base| { base + 2 }));

        let mut values = executor.execute().await.unwrap();
        values.sort();

        assert_eq!(values, vec![11, 12]);
    }

    #[tokio::test]
    pub async fn finished_returns_completed_tasks_only() {
        let mut executor = ConcurrentExecutor::new((), 2);
        executor.register(task!(|_| { 1 }));
        executor.register(task!(|_| {
            std::future::pending::<()>().await;
            2
        }));
        executor.register(task!(|_| { 3 }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let finished: Vec<i32> = executor.finished().into_iter().map(|x| x.unwrap()).collect();

        assert_eq!(finished, vec![1]);
        assert_eq!(executor.len(), 2);
        assert_eq!(executor.shutdown(), 2);
    }

    #[tokio::test]
    pub async fn shutdown_discards_running_and_queued_tasks() {
        let mut executor = ConcurrentExecutor::new((), 1);
        executor.register(task!(|_| {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        }));
        executor.register(task!(|_| { 2 }));

        assert_eq!(executor.shutdown(), 2);

        let values = executor.execute().await;
        assert!(values.is_err() || values.unwrap().is_empty());
    }
}
