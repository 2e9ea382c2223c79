//! Requires a live Postgres at `TEST_DATABASE_URL`; not run by default.

use std::time::Duration;

#[tokio::test]
#[ignore]
async fn coalesces_bursts_of_notify_into_one_signal() {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for this test");
    let pool = sqlx::PgPool::connect(&url).await.unwrap();

    let (mut signal_rx, handle) = flagz_listener::spawn(pool.clone(), "flagz_events_test");

    // Give the listener a moment to connect and issue LISTEN.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for _ in 0..5 {
        sqlx::query("SELECT pg_notify('flagz_events_test', '{}')").execute(&pool).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), signal_rx.recv()).await.unwrap().unwrap();

    // A second recv should not be immediately ready: five notifies coalesced to one signal.
    assert!(tokio::time::timeout(Duration::from_millis(100), signal_rx.recv()).await.is_err());

    handle.shutdown().await;
}
