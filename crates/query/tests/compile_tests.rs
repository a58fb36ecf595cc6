use crmdesk_query::prelude::*;
use crmdesk_query::schema::crm::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn open_tickets() -> Query<Incident> {
    Query::<Incident>::new()
        .top(100)
        .filter("statuscode eq 1")
        .order_by(IncidentField::ModifiedOn, Direction::Desc)
}

#[test]
fn test_open_ticket_list() {
    assert_eq!(
        open_tickets().compile().key(),
        "incidents?$top=100&$filter=statuscode%20eq%201&$orderby=modifiedon%20desc"
    );
}

#[test]
fn test_compile_is_deterministic() {
    let a = open_tickets()
        .select([IncidentField::Title, IncidentField::TicketNumber])
        .expand(Incident::CUSTOMER, [AccountField::Name]);
    let b = Query::<Incident>::new()
        .expand(Incident::CUSTOMER, [AccountField::Name])
        .select([IncidentField::Title])
        .order_by(IncidentField::ModifiedOn, Direction::Desc)
        .select([IncidentField::TicketNumber, IncidentField::Title])
        .filter("statuscode eq 1")
        .top(100);

    assert_eq!(a.compile(), b.compile());
    assert_eq!(a.compile().key(), a.clone().compile().key());
}

#[test]
fn test_second_filter_is_combined() {
    let q = open_tickets().filter("prioritycode eq 1");
    assert_eq!(
        q.compile().key(),
        "incidents?$top=100&$filter=%28statuscode%20eq%201%29%20and%20%28prioritycode%20eq%201%29\
         &$orderby=modifiedon%20desc"
    );
}

#[test]
fn test_raw_filter_concatenation() {
    let q = Query::<Tag>::new().filter("A").append_raw_filter("B");
    assert_eq!(q.compile().key(), "crmdesk_tags?$filter=AB");
}

#[test]
fn test_search_replaces_filter() {
    let q = open_tickets()
        .or_filter("statuscode eq 2")
        .replace_filter("contains(title,'vpn')");
    assert_eq!(
        q.compile().key(),
        "incidents?$top=100&$filter=contains%28title%2C%27vpn%27%29&$orderby=modifiedon%20desc"
    );
}

#[test]
fn test_child_collection_of_record() {
    let q = Query::children_of("0f7c", Incident::EMAILS)
        .select([EmailField::Subject, EmailField::Sender])
        .order_by(EmailField::CreatedOn, Direction::Desc)
        .expand_many(Email::ATTACHMENTS, [AttachmentField::FileName]);

    assert_eq!(
        q.compile().key(),
        "incidents(0f7c)/Incident_Emails?$select=subject,sender&$orderby=createdon%20desc\
         &$expand=email_activity_mime_attachment($select=filename)"
    );

    let tags: Vec<String> = q
        .descriptor()
        .dependency_tags()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        tags,
        vec!["Incident_Emails", "activitymimeattachments", "emails", "incidents"]
    );
}

#[test]
fn test_single_record_and_raw_value() {
    let record = Query::<Incident>::new()
        .id("0f7c")
        .select([IncidentField::Title])
        .expand(Incident::OWNER, [SystemUserField::FullName]);
    assert_eq!(
        record.compile().key(),
        "incidents(0f7c)?$select=title&$expand=owninguser($select=fullname)"
    );
    assert_eq!(record.descriptor().shape(), ResponseShape::Single);

    let body = Query::<Email>::new().id("e1").value_of(EmailField::Description);
    assert_eq!(body.compile().key(), "emails(e1)/description/$value");
    assert_eq!(body.descriptor().shape(), ResponseShape::Raw);
}

#[test]
fn test_expand_same_relation_twice_keeps_last_fields() {
    let q = Query::<Annotation>::new()
        .expand(Annotation::CREATED_BY, [SystemUserField::FullName])
        .expand(
            Annotation::CREATED_BY,
            [SystemUserField::FullName, SystemUserField::InternalEmailAddress],
        );
    assert_eq!(
        q.compile().key(),
        "annotations?$expand=createdby($select=fullname,internalemailaddress)"
    );
}

#[test]
fn test_cache_hints_do_not_change_key() {
    let plain = open_tickets();
    let hinted = open_tickets()
        .refresh_every(std::time::Duration::from_secs(5))
        .cache_when(|v| v.as_array().map_or(false, |a| !a.is_empty()))
        .depends_on("crmdesk_tags");

    assert_eq!(plain.compile().key(), hinted.compile().key());
    assert!(hinted
        .descriptor()
        .dependency_tags()
        .contains(&DependencyTag::new("crmdesk_tags")));
}

#[test]
fn test_insert_body_with_binding() {
    let body = Changes::<Incident>::new()
        .set(IncidentField::Title, "VPN drops every hour")
        .set(IncidentField::PriorityCode, 1)
        .bind(Incident::CUSTOMER, "a1b2")
        .into_value();

    assert_eq!(
        body,
        json!({
            "title": "VPN drops every hour",
            "prioritycode": 1,
            "customerid_account@odata.bind": "/accounts(a1b2)"
        })
    );
}
