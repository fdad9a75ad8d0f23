mod common;

use common::{setup, test_config, FakeEngine};
use convoy::{
    images::{ChangeKind, Image, ImageStatus},
    log::LogType,
    store, ConvoyError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_remove_saved_image() -> anyhow::Result<()> {
    let engine = FakeEngine::new().with_image("sha256:app", &["app:v1"], &[]);
    let ctx = setup(engine, test_config()).await?;
    let image = image(1, "app:v1");
    ctx.manager.save(&image).await?;

    let mut changes = ctx.manager.subscribe();
    ctx.manager.remove(&image).await?;

    assert!(ctx.engine.images().is_empty());
    assert!(store::select_images(&ctx.pool).await?.is_empty());

    let start = changes.try_recv()?;
    assert_eq!(start.kind, ChangeKind::Start);
    assert_eq!(start.image.status, Some(ImageStatus::Deleting));
    assert_eq!(changes.try_recv()?.kind, ChangeKind::Finish);

    assert_eq!(
        ctx.logger.event_types(),
        vec![LogType::DeleteImage, LogType::DeleteImageSuccess]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_remove_without_stored_row_is_a_no_op() -> anyhow::Result<()> {
    let engine = FakeEngine::new().with_image("sha256:app", &["app:v1"], &[]);
    let ctx = setup(engine, test_config()).await?;

    let removed = ctx
        .manager
        .remove_image_if_not_needed(&image(1, "app:v1"))
        .await?;

    assert!(!removed);
    assert!(ctx.engine.calls().is_empty());
    assert!(ctx.engine.image("sha256:app").is_some());
    assert!(ctx.logger.event_types().is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_remove_image_already_gone_from_engine() -> anyhow::Result<()> {
    let engine = FakeEngine::new().with_image("sha256:app", &["app:v1"], &[]);
    let ctx = setup(engine, test_config()).await?;
    let image = image(1, "app:v1");
    ctx.manager.save(&image).await?;
    ctx.engine.fail_removal("app:v1", 404);

    let removed = ctx.manager.remove_image_if_not_needed(&image).await?;

    assert!(!removed);
    assert!(store::select_images(&ctx.pool).await?.is_empty());
    assert!(!ctx
        .logger
        .event_types()
        .contains(&LogType::DeleteImageSuccess));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_remove_engine_failure_keeps_row() -> anyhow::Result<()> {
    let engine = FakeEngine::new().with_image("sha256:app", &["app:v1"], &[]);
    let ctx = setup(engine, test_config()).await?;
    let image = image(1, "app:v1");
    ctx.manager.save(&image).await?;
    ctx.engine.fail_removal("app:v1", 500);

    let mut changes = ctx.manager.subscribe();
    let result = ctx.manager.remove(&image).await;

    assert!(matches!(result, Err(ConvoyError::Status { code: 500, .. })));
    assert_eq!(store::select_images(&ctx.pool).await?.len(), 1);
    assert!(ctx.engine.image("sha256:app").is_some());
    assert!(ctx.logger.event_types().contains(&LogType::DeleteImageError));

    assert_eq!(changes.try_recv()?.kind, ChangeKind::Start);
    assert_eq!(changes.try_recv()?.kind, ChangeKind::Finish);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_concurrent_removals_of_shared_image() -> anyhow::Result<()> {
    let engine =
        FakeEngine::new().with_image("sha256:base", &["app1:latest", "app2:latest"], &[]);
    let ctx = setup(engine, test_config()).await?;

    let first = image(1, "app1:latest");
    let second = image(2, "app2:latest");
    ctx.manager.save(&first).await?;
    ctx.manager.save(&second).await?;

    let (first_result, second_result) =
        tokio::join!(ctx.manager.remove(&first), ctx.manager.remove(&second));

    first_result?;
    second_result?;
    assert!(ctx.engine.images().is_empty());
    assert!(store::select_images(&ctx.pool).await?.is_empty());
    assert!(!ctx.logger.event_types().contains(&LogType::DeleteImageError));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_remove_by_docker_id() -> anyhow::Result<()> {
    let engine = FakeEngine::new()
        .with_image("sha256:app", &["app:v1"], &[])
        .with_image("sha256:other", &["other:v1"], &[]);
    let ctx = setup(engine, test_config()).await?;
    ctx.manager.save(&image(1, "app:v1")).await?;
    ctx.manager.save(&image(2, "other:v1")).await?;

    ctx.manager.remove_by_docker_id("sha256:app").await?;

    assert!(ctx.engine.image("sha256:app").is_none());
    assert!(ctx.engine.image("sha256:other").is_some());

    let stored = store::select_images(&ctx.pool).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "other:v1");

    // Unknown ids are ignored.
    let calls = ctx.engine.calls().len();
    ctx.manager.remove_by_docker_id("sha256:unknown").await?;
    assert_eq!(ctx.engine.calls().len(), calls);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_remove_digest_pinned_image() -> anyhow::Result<()> {
    let name = format!("registry2.example.com/v2/app@{DIGEST}");
    let engine = FakeEngine::new().with_image("sha256:app", &[], &[name.as_str()]);
    let ctx = setup(engine, test_config()).await?;
    let image = image(1, &name);
    ctx.manager.save(&image).await?;
    assert_eq!(
        ctx.engine.image("sha256:app").unwrap().repo_tags,
        vec!["registry2.example.com/v2/app:latest".to_string()]
    );

    assert!(ctx.manager.remove_image_if_not_needed(&image).await?);

    assert!(ctx.engine.images().is_empty());
    assert!(store::select_images(&ctx.pool).await?.is_empty());

    let calls = ctx.engine.calls();
    let lists: Vec<&String> = calls.iter().filter(|c| c.starts_with("list:")).collect();
    assert!(!lists.is_empty());
    assert!(lists.iter().all(|c| *c == "list:registry2.example.com/v2/app"));
    assert!(calls.contains(&"remove:registry2.example.com/v2/app:latest".to_string()));
    assert!(calls.contains(&format!("remove:{name}")));
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn image(app_id: i64, name: &str) -> Image {
    Image::builder()
        .name(name)
        .app_id(app_id)
        .service_id(app_id)
        .service_name("main")
        .image_id(app_id)
        .release_id(1)
        .build()
}
