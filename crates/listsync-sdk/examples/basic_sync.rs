//! 同步核心演示
//!
//! 两个客户端共享同一个内存后端：一个做乐观变更，另一个通过变更订阅收敛。

use listsync_sdk::{init_logging, ListSyncConfig, ListSyncSDK, MemoryBackend, SyncEvent, Table};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ListSyncConfig::builder().stale_time_ms(30_000).build();
    init_logging(&config);

    println!("========================================");
    println!("ListSync 同步演示");
    println!("========================================\n");

    // === 1. 准备后端 ===

    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        Table::Profiles,
        vec![json!({"id": "ada", "display_name": "Ada Lovelace", "email": "ada@example.com"})],
    )?;
    backend.sign_in("ada");
    backend.set_latency(5, 30);

    let sdk = ListSyncSDK::with_backend(config, backend.clone());
    if let Some(profile) = sdk.profile().await? {
        println!("👋 你好，{}\n", profile.greeting_name());
    }

    // === 2. 乐观创建 ===

    let list = match sdk.mutations().create_list("Groceries").await.into_confirmed() {
        Some(list) => list,
        None => return Err("create_list failed".into()),
    };
    println!("✅ 清单已创建: {} ({})", list.name, list.id);

    for title in ["Milk", "Eggs", "Bread"] {
        sdk.mutations().create_todo(&list.id, title).await;
    }
    print_todos(&sdk, &list.id).await?;

    // === 3. 观察远端变更 ===

    let _observation = sdk.observe_list(&list.id).await?;
    let mut events = sdk.subscribe_events();

    let todos = sdk.todos(&list.id).await?;
    if let Some(first) = todos.first() {
        println!("\n📡 另一个客户端把 \"{}\" 改名为 \"Oat milk\"", first.title);
        backend.apply_out_of_band(Table::Todos, &first.id, json!({"title": "Oat milk"}))?;
        sleep(Duration::from_millis(100)).await;
        print_todos(&sdk, &list.id).await?;
    }

    // === 4. 重排序 ===

    let mut ordered: Vec<String> = sdk.todos(&list.id).await?.into_iter().map(|t| t.id).collect();
    ordered.reverse();
    let outcome = sdk.mutations().reorder_todos(&list.id, &ordered).await;
    println!("\n🔀 重排序: confirmed={}", outcome.is_confirmed());
    print_todos(&sdk, &list.id).await?;

    // === 5. 断网回滚 ===

    backend.set_offline(true);
    let outcome = sdk.mutations().create_todo(&list.id, "Butter").await;
    backend.set_offline(false);
    if let Some(notice) = outcome.notice() {
        println!("\n⚠️  创建失败已回滚: {} ({:?})", notice.message, notice.reason);
    }
    print_todos(&sdk, &list.id).await?;

    // === 6. 事件汇总 ===

    let mut counts = std::collections::BTreeMap::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::MutationRolledBack { notice } = &event {
            println!("🔔 失败通知: {}", notice.kind);
        }
        *counts.entry(event.event_type()).or_insert(0) += 1;
    }
    println!("\n📊 事件统计: {:?}", counts);

    sdk.shutdown().await?;
    println!("\n✅ 演示结束");
    Ok(())
}

async fn print_todos(sdk: &ListSyncSDK, list_id: &str) -> listsync_sdk::Result<()> {
    for todo in sdk.todos(list_id).await? {
        let mark = if todo.is_complete { "x" } else { " " };
        println!("   [{}] {} (position {})", mark, todo.title, todo.position);
    }
    Ok(())
}
