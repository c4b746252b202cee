use super::test_db;

#[tokio::test]
async fn test_shutdown_state_initial() {
    let (db, _file) = test_db().await;

    // A database that never saw a clean shutdown reports unclean
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_shutdown_state_clean_lifecycle() {
    let (db, _file) = test_db().await;

    db.set_clean_start().await.unwrap();
    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "running but not yet shut down"
    );

    db.set_clean_shutdown().await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    // Next session starts
    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}
