//! S6: deleting a site, then reloading with `from_local=true`,
//! re-materializes it from its seed file in both store and registry.

mod common;

#[tokio::test]
async fn deleted_site_is_re_adopted_from_its_seed_on_reload() {
    let fixture = common::build(&["site_a"]).await;
    let controller = &fixture.controller;

    assert!(controller.registry.get_site_setup("site_a").await.is_some());

    let deleted = controller.registry.delete_site_setup("site_a").await.unwrap();
    assert!(deleted);
    assert!(controller.registry.get_site_setup("site_a").await.is_none());

    controller.registry.reload(None, true).await.unwrap();

    let restored = controller.registry.get_site_setup("site_a").await.unwrap();
    assert_eq!(
        restored.site_config.as_ref().unwrap().site_url,
        "https://site_a.example.com"
    );
    assert!(restored.is_enabled());
}
