/// Declare a CRM entity: its marker type, field enum and navigation properties.
///
/// ```rust,ignore
/// entity! {
///     /// Support ticket
///     pub struct Incident("incident") => "incidents" {
///         key: IncidentId,
///         fields: IncidentField {
///             IncidentId => "incidentid",
///             Title => "title",
///         }
///         relations {
///             CUSTOMER: Account => "customerid_account",
///         }
///         collections {
///             EMAILS: Email => "Incident_Emails",
///         }
///     }
/// }
/// ```
///
/// `relations` and `collections` are optional but must appear in that order.
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($logical:literal) => $endpoint:literal {
            key: $key:ident,
            fields: $field_enum:ident {
                $( $(#[$fmeta:meta])* $variant:ident => $fname:literal ),+ $(,)?
            }
            $( relations {
                $( $(#[$rmeta:meta])* $rconst:ident : $rtarget:ty => $rname:literal ),* $(,)?
            } )?
            $( collections {
                $( $(#[$cmeta:meta])* $cconst:ident : $ctarget:ty => $cname:literal ),* $(,)?
            } )?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name;

        #[doc = concat!("Attributes of `", $endpoint, "`.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $field_enum {
            $( $(#[$fmeta])* $variant, )+
        }

        impl $crate::Field for $field_enum {
            fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $fname, )+
                }
            }

            fn all() -> &'static [Self] {
                &[ $( Self::$variant, )+ ]
            }
        }

        impl $crate::Entity for $name {
            type Field = $field_enum;

            const ENDPOINT: &'static str = $endpoint;
            const LOGICAL_NAME: &'static str = $logical;

            fn primary_key() -> Self::Field {
                $field_enum::$key
            }
        }

        #[allow(dead_code)]
        impl $name {
            $( $(
                $(#[$rmeta])*
                pub const $rconst: $crate::Relation<$name, $rtarget> = $crate::Relation::new($rname);
            )* )?
            $( $(
                $(#[$cmeta])*
                pub const $cconst: $crate::Collection<$name, $ctarget> = $crate::Collection::new($cname);
            )* )?
        }
    };
}
