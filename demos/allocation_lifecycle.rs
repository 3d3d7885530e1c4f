//! Allocation request lifecycle example.
//!
//! This example demonstrates:
//! - Loading configuration and installing the logger
//! - Routing a request through the responsibility matrix
//! - Approving steps, with auto-skips and auto-accept
//! - Provisioning and printing the status board
//! - Resolving notification recipients from published events
//!
//! Run with: `cargo run --example allocation_lifecycle`
//! (set `REQFLOW_STORE__BACKEND=sqlite` with `--features sqlite` to persist)

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use reqflow::{
    init_logging, AccountClassification, AllocationKind, BroadcastPublisher, InMemoryOrgChart,
    LifecycleEvent, Person, Position, RecipientTable, ReqflowConfig, Request, RequestOrchestrator,
    RequestRouter, RequestType, Result, RoutingRule, StoreHandle,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ReqflowConfig::load()?;
    init_logging(&config.logging)?;

    println!("╔═══════════════════════════════════════════╗");
    println!("║  Reqflow Allocation Lifecycle Example     ║");
    println!("╚═══════════════════════════════════════════╝\n");

    let project = Uuid::new_v4();
    let location = Uuid::new_v4();
    let position = Uuid::new_v4();

    // Org chart and responsibility matrix
    println!("🏢 Setting up org chart and routing rules...");
    let org = Arc::new(
        InMemoryOrgChart::new()
            .with_position(Position {
                id: position,
                project_id: project,
                base_position_id: Uuid::new_v4(),
                base_position_department: Some("PDP PRD PMC".to_string()),
            })
            .with_department("PDP PRD PMC"),
    );

    let store = StoreHandle::open(&config.store).await?;
    let rules = store.rules();
    rules
        .save_rule(&RoutingRule::new("PDP PRD FE ANE").for_project(project))
        .await?;
    rules
        .save_rule(
            &RoutingRule::new("PDP PRD FE MMS")
                .for_project(project)
                .for_discipline("Piping")
                .with_responsible(Person::new(Uuid::new_v4(), "Resource Owner")),
        )
        .await?;
    println!("   Rules: {}\n", rules.list_all().await?.len());

    let publisher = BroadcastPublisher::new(config.events.channel_capacity);
    let mut events = publisher.subscribe();
    let orchestrator = RequestOrchestrator::new(
        store.requests(),
        RequestRouter::new(rules, org.clone(), org),
        Arc::new(publisher),
    );

    // Print every event with the parties that would be notified
    let requests = store.requests();
    let listener = tokio::spawn(async move {
        let table = RecipientTable::default();
        while let Ok(event) = events.recv().await {
            let recipients = match requests.load(event.request_id()).await {
                Ok(request) => table.resolve(&event, &request).len(),
                Err(_) => 0,
            };
            println!("   [Event] {:?} ({} recipients)", event.kind(), recipients);
            if matches!(event, LifecycleEvent::RequestProvisioned { .. }) {
                break;
            }
        }
    });

    let creator = Person::new(Uuid::new_v4(), "Task Owner");
    let request = Request::new(
        RequestType::Allocation(AllocationKind::Normal),
        project,
        creator.clone(),
    )
    .with_position(position)
    .with_location(location)
    .with_discipline("Piping")
    .with_proposed_person(
        Person::new(Uuid::new_v4(), "Kari Nordmann"),
        AccountClassification::Employee,
    )
    .with_proposed_change("workload", json!(80));
    let id = request.id;
    store.requests().insert(&request).await?;

    println!("▶️  Initialize");
    println!("─────────────────────────────────────────");
    let request = orchestrator.initialize(id).await?;
    println!(
        "   Assigned to: {}",
        request.assigned_department.as_deref().unwrap_or("(none)")
    );

    println!("\n✅ Resource owner proposes");
    println!("─────────────────────────────────────────");
    orchestrator
        .approve(id, Person::new(Uuid::new_v4(), "Resource Owner"))
        .await?;

    println!("\n✅ Task owner accepts");
    println!("─────────────────────────────────────────");
    orchestrator.approve(id, creator).await?;

    println!("\n📊 Status before provisioning:");
    println!("─────────────────────────────────────────");
    println!("{}", orchestrator.status(id).await?);

    println!("⚙️  Provisioning");
    println!("─────────────────────────────────────────");
    orchestrator
        .provision(id, Person::new(Uuid::nil(), "Provisioning service"))
        .await?;

    let _ = listener.await;

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    let status = orchestrator.status(id).await?;
    println!("{}", status);

    if status.is_complete() {
        println!("\n🎉 Request provisioned!\n");
    }

    Ok(())
}
