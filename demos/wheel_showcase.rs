use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use wheel_timer::{TaskId, TaskCallback, TimerError, TimingWheel};

struct Greeting(&'static str);
struct FailingTask;

#[async_trait]
impl TaskCallback for Greeting {
    async fn execute(&self) -> Result<(), TimerError> {
        println!("{} fired at {:?}", self.0, std::time::SystemTime::now());
        Ok(())
    }
}

#[async_trait]
impl TaskCallback for FailingTask {
    async fn execute(&self) -> Result<(), TimerError> {
        Err(TimerError::CallbackError("index 1 out of bounds".into()))
    }
}

#[tokio::main]
async fn main() {
    let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();

    // 1. Tasks due within the first sweep
    wheel
        .schedule(Duration::from_secs(2), Greeting("2s task #1"))
        .unwrap();
    wheel
        .schedule(Duration::from_secs(2), Greeting("2s task #2"))
        .unwrap();

    // 2. Task due on the second revolution, canceled below
    let canceled = wheel
        .schedule(Duration::from_secs(11), Greeting("11s task #1"))
        .unwrap();

    // 3. Failing task with an error handler
    wheel
        .schedule_with_handler(
            Duration::from_secs(11),
            FailingTask,
            |error: &TimerError, task: TaskId| println!("{} failed: {}", task, error),
        )
        .unwrap();

    // 4. Failing task without a handler goes to the fault sink
    wheel
        .schedule(Duration::from_secs(5), FailingTask)
        .unwrap();

    // 5. Invalid delay
    if let Err(e) = wheel.schedule(Duration::ZERO, Greeting("never")) {
        println!("Rejected task: {}", e);
    }

    wheel.start().unwrap();

    sleep(Duration::from_secs(2)).await;
    println!("Canceling {}: {}", canceled, wheel.cancel(canceled));

    sleep(Duration::from_secs(11)).await;
    wheel.shutdown().await;
    println!("Wheel statistics: {:?}", wheel.statistics());
}
