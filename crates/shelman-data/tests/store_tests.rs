use serde_json::json;
use shelman_data::{
    DeviceQuery, DevicePatch, DeviceSort, NewAuditRecord, NewDevice, NewTemplate, Store,
    TemplateScope, audit, devices, tags, templates,
};
use shelman_test_support::postgres::start_postgres;

async fn connect() -> Option<(shelman_test_support::TestDatabase, Store)> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping store tests: {err}");
            return None;
        }
    };
    let store = Store::connect(postgres.connection_string())
        .await
        .expect("store connects and migrates");
    Some((postgres, store))
}

fn plug(mac: &str) -> NewDevice {
    NewDevice {
        mac: mac.to_string(),
        ip: Some("192.168.1.40".to_string()),
        name: Some("Kitchen Plug".to_string()),
        model: "SHPLG-S".to_string(),
        generation: 1,
    }
}

#[tokio::test]
async fn device_rows_round_trip_with_unique_macs() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let row = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:FF")).await?;
    assert_eq!(row.mac, "AA:BB:CC:DD:EE:FF");
    assert!(!row.config_applied);
    assert!(row.template_ids.is_empty());

    let fetched = devices::fetch_device(store.pool(), row.id).await?.expect("row");
    assert_eq!(fetched.name.as_deref(), Some("Kitchen Plug"));

    let err = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:FF"))
        .await
        .expect_err("duplicate mac must collide");
    assert!(err.is_unique_violation());
    Ok(())
}

#[tokio::test]
async fn partial_update_only_touches_named_fields() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let row = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:01")).await?;
    let mut tx = store.begin().await?;
    let updated = devices::update_device(
        &mut tx,
        row.id,
        &DevicePatch {
            name: Some("Updated".to_string()),
            ..DevicePatch::default()
        },
    )
    .await?;
    tx.commit().await?;

    assert_eq!(updated.name.as_deref(), Some("Updated"));
    assert_eq!(updated.mac, "AA:BB:CC:DD:EE:01");
    assert_eq!(updated.ip.as_deref(), Some("192.168.1.40"));
    Ok(())
}

#[tokio::test]
async fn listing_supports_search_tags_and_pagination() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    for (index, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
        let mut device = plug(&format!("AA:BB:CC:DD:EE:1{index}"));
        device.name = Some((*name).to_string());
        let row = devices::insert_device(store.pool(), &device).await?;
        if index < 2 {
            tags::add_tag(store.pool(), row.id, "office").await?;
        }
    }

    let (all, total) = devices::list_devices(store.pool(), &DeviceQuery::default()).await?;
    assert_eq!(all.len(), 3);
    assert_eq!(total, 3);

    let (found, total) = devices::list_devices(
        store.pool(),
        &DeviceQuery {
            search: Some("beta".to_string()),
            ..DeviceQuery::default()
        },
    )
    .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(total, 1);

    let (tagged, total) = devices::list_devices(
        store.pool(),
        &DeviceQuery {
            tag: Some("office".to_string()),
            sort: DeviceSort::Name,
            descending: true,
            ..DeviceQuery::default()
        },
    )
    .await?;
    assert_eq!(total, 2);
    assert_eq!(tagged[0].name.as_deref(), Some("beta"));

    let (page, total) = devices::list_devices(
        store.pool(),
        &DeviceQuery {
            limit: Some(2),
            offset: 2,
            ..DeviceQuery::default()
        },
    )
    .await?;
    assert_eq!(total, 3);
    assert_eq!(page.len(), 1);
    Ok(())
}

#[tokio::test]
async fn template_reference_queries_cover_assignments() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let template = templates::insert_template(
        store.pool(),
        &NewTemplate {
            name: "office-defaults".to_string(),
            description: None,
            scope: TemplateScope::Group,
            device_type: None,
            config: json!({"mqtt": {"server": "broker.local:1883"}}),
        },
    )
    .await?;

    let device = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:20")).await?;
    devices::set_template_ids(store.pool(), device.id, &[template.id]).await?;

    let referencing =
        devices::devices_referencing_template(store.pool(), template.id).await?;
    assert_eq!(referencing, vec![device.id]);

    // Scope/device_type consistency is enforced by the schema itself.
    let err = templates::insert_template(
        store.pool(),
        &NewTemplate {
            name: "broken".to_string(),
            description: None,
            scope: TemplateScope::DeviceType,
            device_type: None,
            config: json!({}),
        },
    )
    .await
    .expect_err("schema must reject device_type scope without a model");
    assert!(!err.is_unique_violation());
    Ok(())
}

#[tokio::test]
async fn tag_pairs_are_unique_and_cascade_on_delete() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let device = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:30")).await?;
    tags::add_tag(store.pool(), device.id, "office").await?;
    tags::add_tag(store.pool(), device.id, "office").await?;
    assert_eq!(
        tags::tags_for_device(store.pool(), device.id).await?,
        vec!["office".to_string()]
    );

    let index = tags::list_tags(store.pool()).await?;
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].device_count, 1);

    assert!(devices::delete_device(store.pool(), device.id).await?);
    assert!(tags::list_tags(store.pool()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn audit_trail_is_append_only_and_queryable_per_entity() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let device = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:31")).await?;
    for action in ["device.create", "config.apply", "config.verify"] {
        audit::append(
            store.pool(),
            &NewAuditRecord {
                actor: "admin".to_string(),
                request_id: Some("req-1".to_string()),
                action: action.to_string(),
                entity: "device",
                entity_id: device.id,
                detail: Some(json!({"note": action})),
            },
        )
        .await?;
    }

    let trail = audit::list_for_entity(store.pool(), "device", device.id, 10).await?;
    assert_eq!(trail.len(), 3);
    // Newest first.
    assert_eq!(trail[0].action, "config.verify");
    assert_eq!(trail[0].request_id.as_deref(), Some("req-1"));

    let limited = audit::list_for_entity(store.pool(), "device", device.id, 1).await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

#[tokio::test]
async fn desired_config_writes_always_clear_the_applied_flag() -> anyhow::Result<()> {
    let Some((_postgres, store)) = connect().await else {
        return Ok(());
    };

    let device = devices::insert_device(store.pool(), &plug("AA:BB:CC:DD:EE:32")).await?;
    devices::set_config_applied(store.pool(), device.id, true).await?;

    devices::set_desired_config(
        store.pool(),
        device.id,
        &json!({"mqtt": {"server": "broker.local:1883"}}),
    )
    .await?;

    let row = devices::fetch_device(store.pool(), device.id).await?.expect("row");
    assert!(!row.config_applied);
    assert!(row.desired_config.is_some());

    let pending = devices::list_pending_devices(store.pool()).await?;
    assert_eq!(pending.len(), 1);
    Ok(())
}
