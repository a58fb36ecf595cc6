//! Entities of the CRM organisation backing the ticket workspace.

entity! {
    /// Support ticket (`incident` in the CRM).
    pub struct Incident("incident") => "incidents" {
        key: IncidentId,
        fields: IncidentField {
            IncidentId => "incidentid",
            Title => "title",
            TicketNumber => "ticketnumber",
            Description => "description",
            StatusCode => "statuscode",
            StateCode => "statecode",
            PriorityCode => "prioritycode",
            CaseOriginCode => "caseorigincode",
            CreatedOn => "createdon",
            ModifiedOn => "modifiedon",
            /// Lookup value of the customer account
            CustomerId => "_customerid_value",
            /// Lookup value of the owning user
            OwnerId => "_ownerid_value",
        }
        relations {
            CUSTOMER: Account => "customerid_account",
            OWNER: SystemUser => "owninguser",
        }
        collections {
            EMAILS: Email => "Incident_Emails",
            NOTES: Annotation => "Incident_Annotation",
            TAGS: Tag => "crmdesk_incident_crmdesk_tag",
        }
    }
}

entity! {
    /// Email activity, usually regarding a ticket.
    pub struct Email("email") => "emails" {
        key: ActivityId,
        fields: EmailField {
            ActivityId => "activityid",
            Subject => "subject",
            /// HTML body
            Description => "description",
            Sender => "sender",
            ToRecipients => "torecipients",
            DirectionCode => "directioncode",
            StatusCode => "statuscode",
            CreatedOn => "createdon",
            RegardingObjectId => "_regardingobjectid_value",
        }
        relations {
            REGARDING_INCIDENT: Incident => "regardingobjectid_incident_email",
        }
        collections {
            ATTACHMENTS: Attachment => "email_activity_mime_attachment",
        }
    }
}

entity! {
    /// File attached to an email.
    pub struct Attachment("activitymimeattachment") => "activitymimeattachments" {
        key: AttachmentId,
        fields: AttachmentField {
            AttachmentId => "activitymimeattachmentid",
            FileName => "filename",
            MimeType => "mimetype",
            FileSize => "filesize",
            /// Base64 content
            Body => "body",
        }
    }
}

entity! {
    /// Internal note on a ticket (`annotation` in the CRM).
    pub struct Annotation("annotation") => "annotations" {
        key: AnnotationId,
        fields: AnnotationField {
            AnnotationId => "annotationid",
            Subject => "subject",
            NoteText => "notetext",
            IsDocument => "isdocument",
            FileName => "filename",
            CreatedOn => "createdon",
            ObjectId => "_objectid_value",
        }
        relations {
            CREATED_BY: SystemUser => "createdby",
            OBJECT_INCIDENT: Incident => "objectid_incident",
        }
    }
}

entity! {
    /// Label attached to tickets.
    pub struct Tag("crmdesk_tag") => "crmdesk_tags" {
        key: TagId,
        fields: TagField {
            TagId => "crmdesk_tagid",
            Name => "crmdesk_name",
            Color => "crmdesk_color",
        }
    }
}

entity! {
    /// Customer account.
    pub struct Account("account") => "accounts" {
        key: AccountId,
        fields: AccountField {
            AccountId => "accountid",
            Name => "name",
            EmailAddress => "emailaddress1",
            Telephone => "telephone1",
            WebsiteUrl => "websiteurl",
            PrimaryContactId => "_primarycontactid_value",
        }
        collections {
            INCIDENTS: Incident => "incident_customer_accounts",
        }
    }
}

entity! {
    /// CRM user (ticket owner, note author).
    pub struct SystemUser("systemuser") => "systemusers" {
        key: SystemUserId,
        fields: SystemUserField {
            SystemUserId => "systemuserid",
            FullName => "fullname",
            InternalEmailAddress => "internalemailaddress",
            IsDisabled => "isdisabled",
        }
    }
}

entity! {
    /// Reply template for emails.
    pub struct Template("template") => "templates" {
        key: TemplateId,
        fields: TemplateField {
            TemplateId => "templateid",
            Title => "title",
            Subject => "subject",
            Body => "body",
            TemplateTypeCode => "templatetypecode",
            LanguageCode => "languagecode",
        }
        relations {
            OWNER: SystemUser => "owninguser",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field_names, Entity, Field};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_endpoints_and_keys() {
        assert_eq!(Incident::ENDPOINT, "incidents");
        assert_eq!(Incident::LOGICAL_NAME, "incident");
        assert_eq!(Incident::primary_key().name(), "incidentid");
        assert_eq!(Annotation::endpoint(), "annotations");
        assert_eq!(Tag::primary_key(), TagField::TagId);
    }

    #[test]
    fn test_field_names_keep_order() {
        let names = field_names([IncidentField::Title, IncidentField::StatusCode]);
        assert_eq!(names, vec!["title", "statuscode"]);
    }

    #[test]
    fn test_all_fields_listed_once() {
        let all = SystemUserField::all();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0], SystemUserField::SystemUserId);
        assert_eq!(all[3].name(), "isdisabled");
    }

    #[test]
    fn test_relations_point_at_target_endpoint() {
        assert_eq!(Incident::CUSTOMER.name(), "customerid_account");
        assert_eq!(Incident::CUSTOMER.target_endpoint(), "accounts");
        assert_eq!(Incident::CUSTOMER.bind_path("42"), "/accounts(42)");
        assert_eq!(Incident::EMAILS.target_endpoint(), "emails");
        assert_eq!(Account::INCIDENTS.name(), "incident_customer_accounts");
    }

    #[test]
    fn test_relation_debug_names_both_sides() {
        let debug = format!("{:?}", Annotation::OBJECT_INCIDENT);
        assert_eq!(debug, "Relation(annotations -> incidents via objectid_incident)");
    }
}
