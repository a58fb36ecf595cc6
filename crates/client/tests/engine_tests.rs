use std::{sync::Arc, time::Duration};

use anyhow::Context;
use crmdesk_client::{
    http::{Fixture, FixtureTransport, RetryPolicy},
    prelude::*,
    EntryState, QueryError,
};
use crmdesk_query::{schema::crm::*, Method};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const OPEN_TICKETS: &str =
    "incidents?$top=100&$filter=statuscode%20eq%201&$orderby=modifiedon%20desc";

fn client_with(transport: &Arc<FixtureTransport>, config: ClientConfig) -> QueryClient {
    QueryClient::with_transport(config, transport.clone())
}

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_cache_duration("incidents", Duration::from_secs(30))
        .with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        })
}

fn open_tickets(client: &QueryClient) -> Query<Incident, QueryClient> {
    client
        .query::<Incident>()
        .top(100)
        .filter("statuscode eq 1")
        .order_by(IncidentField::ModifiedOn, Direction::Desc)
}

fn tickets(titles: &[&str]) -> Value {
    json!({
        "@odata.context": "$metadata#incidents",
        "value": titles.iter().map(|t| json!({"title": t})).collect::<Vec<_>>()
    })
}

#[tokio::test(start_paused = true)]
async fn test_identical_queries_share_one_fetch() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["VPN down"])));
    let client = client_with(&transport, config());

    let first = open_tickets(&client).observe_raw(None)?;
    let second = open_tickets(&client).observe_raw(None)?;
    assert!(first.ptr_eq(&second));

    let mut sub = second.subscribe();
    let value = sub.loaded().await.context("value")?;
    assert_eq!(*value, json!([{"title": "VPN down"}]));

    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 1);
    assert_eq!(client.store().keys(), vec![OPEN_TICKETS]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_entry_is_evicted_on_tick() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["a"])));
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(None)?;
    value.subscribe().loaded().await.context("value")?;
    let entry = client.store().get(OPEN_TICKETS).context("entry")?;
    drop(value);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(client.store().is_empty());
    assert_eq!(entry.state(), EntryState::Evicted);
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 1);

    let again = open_tickets(&client).observe_raw(None)?;
    again.subscribe().loaded().await.context("value")?;
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 2);
    assert_eq!(client.store().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_held_value_without_subscribers_is_evicted_on_tick() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["a"])));
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(None)?;
    let mut sub = value.subscribe();
    sub.loaded().await.context("value")?;
    drop(sub);
    assert_eq!(value.subscriber_count(), 0);

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert!(client.store().is_empty());
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 1);
    // the handle still shows the last value
    assert_eq!(value.current().as_deref(), Some(&json!([{"title": "a"}])));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_observed_entry_refreshes_on_tick() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["v1"])))
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["v2"])));
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(None)?;
    let mut sub = value.subscribe();
    assert_eq!(*sub.loaded().await.context("v1")?, json!([{"title": "v1"}]));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(*sub.next().await.context("v2")?, json!([{"title": "v2"}]));

    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 2);
    let entry = client.store().get(OPEN_TICKETS).context("entry")?;
    assert_eq!(entry.state(), EntryState::Ready);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_previous_value_is_served_until_fetch_completes() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(
        Method::Get,
        OPEN_TICKETS,
        Fixture::json(tickets(&["fresh"])).delayed(Duration::from_secs(2)),
    );
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(Some(json!([{"title": "stale"}])))?;
    let mut sub = value.subscribe();
    assert_eq!(*sub.next().await.context("seed")?, json!([{"title": "stale"}]));
    assert_eq!(*sub.next().await.context("fresh")?, json!([{"title": "fresh"}]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_refreshes_only_tagged_entries() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["v1"])))
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["v2"])))
        .respond(
            Method::Get,
            "templates?$select=title",
            Fixture::json(json!({"value": [{"title": "Greeting"}]})),
        );
    let client = client_with(&transport, config());

    let incidents = open_tickets(&client).observe_raw(None)?;
    let templates = client
        .query::<Template>()
        .select([TemplateField::Title])
        .observe_raw(None)?;
    let mut incident_sub = incidents.subscribe();
    let mut template_sub = templates.subscribe();
    incident_sub.loaded().await.context("incidents")?;
    template_sub.loaded().await.context("templates")?;

    assert_eq!(client.invalidate_and_wait("incidents").await, 1);

    assert_eq!(incidents.current().as_deref(), Some(&json!([{"title": "v2"}])));
    assert_eq!(templates.current().as_deref(), Some(&json!([{"title": "Greeting"}])));
    assert_eq!(transport.call_count(Method::Get, "templates?$select=title"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_reaches_expanded_targets() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    let key = "incidents?$select=title&$expand=customerid_account($select=name)";
    transport
        .respond(Method::Get, key, Fixture::json(tickets(&["before"])))
        .respond(Method::Get, key, Fixture::json(tickets(&["after"])));
    let client = client_with(&transport, config());

    let value = client
        .query::<Incident>()
        .select([IncidentField::Title])
        .expand(Incident::CUSTOMER, [AccountField::Name])
        .observe_raw(None)?;
    let mut sub = value.subscribe();
    sub.loaded().await.context("before")?;

    assert_eq!(client.invalidate("accounts")?, 1);
    assert_eq!(*sub.next().await.context("after")?, json!([{"title": "after"}]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_insert_posts_once_on_success() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(
        Method::Post,
        "templates",
        Fixture::status(201, r#"{"templateid": "t-1", "title": "x"}"#),
    );
    let client = client_with(&transport, config());

    let created = client
        .query::<Template>()
        .insert(Changes::<Template>::new().set(TemplateField::Title, "x"))
        .await?;

    assert_eq!(created, Some(json!({"templateid": "t-1", "title": "x"})));
    assert_eq!(transport.call_count(Method::Post, "templates"), 1);
    assert_eq!(transport.calls()[0].body, Some(json!({"title": "x"})));
    assert!(client.store().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_insert_retries_server_errors() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(Method::Post, "incidents", Fixture::status(503, "busy"))
        .respond(Method::Post, "incidents", Fixture::no_content());
    let client = client_with(&transport, config());

    let created = client
        .query::<Incident>()
        .insert(
            Changes::<Incident>::new()
                .set(IncidentField::Title, "Printer on fire")
                .bind(Incident::CUSTOMER, "acc-1"),
        )
        .await?;

    assert_eq!(created, None);
    assert_eq!(transport.call_count(Method::Post, "incidents"), 2);
    assert_eq!(
        transport.calls()[0].body,
        Some(json!({
            "title": "Printer on fire",
            "customerid_account@odata.bind": "/accounts(acc-1)"
        }))
    );
    assert!(client.store().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(
        Method::Patch,
        "incidents(42)",
        Fixture::status(400, "statuscode is read-only"),
    );
    let client = client_with(&transport, config());

    let err = client
        .upsert("incidents", "42", json!({"statuscode": 5}))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(transport.call_count(Method::Patch, "incidents(42)"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_attempts() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Post, "annotations", Fixture::connection_failure());
    let client = client_with(&transport, config());

    let err = client
        .insert("annotations", json!({"notetext": "called back"}))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(transport.call_count(Method::Post, "annotations"), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_uncacheable_value_is_delivered_then_dropped() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&[])));
    let client = client_with(&transport, config());

    let non_empty = |v: &Value| v.as_array().map_or(false, |a| !a.is_empty());
    let value = open_tickets(&client).cache_when(non_empty).observe_raw(None)?;
    assert_eq!(*value.subscribe().loaded().await.context("empty")?, json!([]));
    assert!(client.store().is_empty());

    open_tickets(&client)
        .cache_when(non_empty)
        .observe_raw(None)?
        .subscribe()
        .loaded()
        .await
        .context("refetch")?;
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_later_fetch_wins_over_slower_earlier_one() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(
            Method::Get,
            OPEN_TICKETS,
            Fixture::json(tickets(&["slow v1"])).delayed(Duration::from_secs(5)),
        )
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["fast v2"])));
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(None)?;
    assert_eq!(client.invalidate("incidents")?, 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(value.current().as_deref(), Some(&json!([{"title": "fast v2"}])));
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_last_value() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["good"])))
        .respond(Method::Get, OPEN_TICKETS, Fixture::status(500, "oops"));
    let client = client_with(&transport, config().with_retry(RetryPolicy::none()));

    let value = open_tickets(&client).observe_raw(None)?;
    value.subscribe().loaded().await.context("good")?;

    assert_eq!(client.invalidate_and_wait("incidents").await, 1);
    assert_eq!(value.current().as_deref(), Some(&json!([{"title": "good"}])));
    let entry = client.store().get(OPEN_TICKETS).context("entry")?;
    assert_eq!(entry.state(), EntryState::Ready);
    Ok(())
}

#[derive(Debug, PartialEq, serde::Deserialize)]
struct Ticket {
    title: String,
    ticketnumber: String,
}

#[tokio::test(start_paused = true)]
async fn test_single_record_and_raw_value() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(
            Method::Get,
            "incidents(7)?$select=title,ticketnumber",
            Fixture::json(json!({"title": "VPN", "ticketnumber": "CAS-7"})),
        )
        .respond(
            Method::Get,
            "emails(e1)/description/$value",
            Fixture::status(200, "<p>Hello</p>"),
        );
    let client = client_with(&transport, config());

    let ticket = client
        .query::<Incident>()
        .id("7")
        .select([IncidentField::Title, IncidentField::TicketNumber])
        .observe::<Ticket>(None)?;
    let mut sub = ticket.subscribe();
    assert_eq!(
        sub.loaded().await.context("ticket")??,
        Ticket {
            title: "VPN".into(),
            ticketnumber: "CAS-7".into()
        }
    );

    let body: String = client
        .query::<Email>()
        .id("e1")
        .value_of(EmailField::Description)
        .fetch()
        .await?;
    assert_eq!(body, "<p>Hello</p>");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_child_collection_and_paging() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport
        .respond(
            Method::Get,
            "incidents(7)/Incident_Emails?$select=subject",
            Fixture::json(json!({
                "value": [{"subject": "Re: VPN"}],
                "@odata.nextLink": "http://localhost:5555/api/data/v9.2/incidents(7)/Incident_Emails?$select=subject&$skiptoken=1"
            })),
        )
        .respond(
            Method::Get,
            "incidents(7)/Incident_Emails?$select=subject&$skiptoken=1",
            Fixture::json(json!({"value": [{"subject": "VPN"}]})),
        );
    let client = client_with(&transport, config());

    let emails = client
        .children("7", Incident::EMAILS)
        .select([EmailField::Subject]);
    let first = client.fetch_page(emails.descriptor()).await?;
    assert_eq!(first.items, vec![json!({"subject": "Re: VPN"})]);

    let second = client
        .next_page(first.next_link.as_deref().context("next link")?)
        .await?;
    assert_eq!(second.items, vec![json!({"subject": "VPN"})]);
    assert_eq!(second.next_link, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_clear_stops_everything() -> anyhow::Result<()> {
    let transport = Arc::new(FixtureTransport::new());
    transport.respond(Method::Get, OPEN_TICKETS, Fixture::json(tickets(&["a"])));
    let client = client_with(&transport, config());

    let value = open_tickets(&client).observe_raw(None)?;
    let mut sub = value.subscribe();
    sub.loaded().await.context("a")?;
    let entry = client.store().get(OPEN_TICKETS).context("entry")?;
    assert!(entry.has_refresh_task());

    client.store().clear();
    assert_eq!(entry.state(), EntryState::Evicted);
    assert!(!entry.has_refresh_task());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.call_count(Method::Get, OPEN_TICKETS), 1);
    Ok(())
}
