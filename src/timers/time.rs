use tokio::time::{Duration, Instant};

#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) use mock::{mocked_clock, MockClock, MockClockController};


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn mock_clock_sleeps_until_advanced_past_deadline() {
        let (mut clock, mut controller) = mocked_clock();
        let deadline = clock.now() + Duration::from_millis(100);
        let (tx, mut rx) = oneshot::channel();

        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            let _ = tx.send(());
        });

        controller.advance(Duration::from_millis(60));
        tokio::time::timeout(Duration::from_millis(20), &mut rx)
            .await
            .expect_err("Slept past an unreached deadline");

        controller.advance(Duration::from_millis(40));
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("Sleeper never woke up")
            .unwrap();
        assert_eq!(controller.elapsed(), Duration::from_millis(100));
    }
}
