//! Reference data for the source CRMs the engine knows how to recognize.

use crate::models::{Connector, ConnectorField, DestinationHint, FieldType};

const MIN_DETECTION_SCORE: f64 = 2.0;

fn field(
    name: &str,
    field_type: FieldType,
    aliases: &[&str],
    destination: Option<(&str, &str)>,
) -> ConnectorField {
    ConnectorField {
        name: name.to_string(),
        field_type,
        aliases: aliases.iter().map(ToString::to_string).collect(),
        destination: destination.map(|(table, field)| DestinationHint {
            table: table.to_string(),
            field: field.to_string(),
        }),
    }
}

fn connector(
    key: &str,
    name: &str,
    popularity_rank: i32,
    keywords: &[&str],
    fields: Vec<ConnectorField>,
) -> Connector {
    Connector {
        key: key.to_string(),
        name: name.to_string(),
        fields,
        detection_keywords: keywords.iter().map(ToString::to_string).collect(),
        popularity_rank,
        is_active: true,
    }
}

/// Connectors written to the store on first open.
pub fn seed_connectors() -> Vec<Connector> {
    use FieldType::*;
    vec![
        connector(
            "salesforce",
            "Salesforce",
            1,
            &["__c", "accountid", "ownerid", "leadsource", "stagename", "sobject"],
            vec![
                field("FirstName", String, &["First Name"], Some(("contacts", "first_name"))),
                field("LastName", String, &["Last Name"], Some(("contacts", "last_name"))),
                field("Email", String, &[], Some(("contacts", "email"))),
                field("Phone", String, &[], Some(("contacts", "phone"))),
                field("Title", String, &[], Some(("contacts", "job_title"))),
                field("LeadSource", String, &["Lead Source"], Some(("contacts", "lead_source"))),
                field("Account.Name", String, &["Account Name", "AccountName"], Some(("companies", "name"))),
                field("StageName", String, &["Stage"], Some(("deals", "stage"))),
                field("Amount", Number, &[], Some(("deals", "amount"))),
                field("CloseDate", Date, &["Close Date"], Some(("deals", "close_date"))),
                field("CreatedDate", Date, &["Created Date"], Some(("contacts", "created_date"))),
            ],
        ),
        connector(
            "hubspot",
            "HubSpot",
            2,
            &["hs_", "hubspot", "lifecyclestage", "dealstage", "record id"],
            vec![
                field("firstname", String, &["First Name"], Some(("contacts", "first_name"))),
                field("lastname", String, &["Last Name"], Some(("contacts", "last_name"))),
                field("email", String, &["Email"], Some(("contacts", "email"))),
                field("phone", String, &["Phone Number"], Some(("contacts", "phone"))),
                field("jobtitle", String, &["Job Title"], Some(("contacts", "job_title"))),
                field("company", String, &["Company Name"], Some(("contacts", "company_name"))),
                field("lifecyclestage", String, &["Lifecycle Stage"], Some(("contacts", "lead_status"))),
                field("hs_lead_status", String, &["Lead Status"], Some(("contacts", "lead_status"))),
                field("dealname", String, &["Deal Name"], Some(("deals", "name"))),
                field("dealstage", String, &["Deal Stage"], Some(("deals", "stage"))),
                field("createdate", Date, &["Create Date"], Some(("contacts", "created_date"))),
            ],
        ),
        connector(
            "pipedrive",
            "Pipedrive",
            3,
            &["pipedrive", "person - ", "organization - ", "deal - "],
            vec![
                field("Person - Name", String, &["Name"], None),
                field("Person - Email", String, &["Email"], Some(("contacts", "email"))),
                field("Person - Phone", String, &["Phone"], Some(("contacts", "phone"))),
                field("Organization - Name", String, &["Organization"], Some(("companies", "name"))),
                field("Deal - Title", String, &["Title"], Some(("deals", "name"))),
                field("Deal - Value", Number, &["Value"], Some(("deals", "amount"))),
                field("Deal - Stage", String, &["Stage"], Some(("deals", "stage"))),
                field("Deal - Expected close date", Date, &["Expected close date"], Some(("deals", "close_date"))),
            ],
        ),
        connector(
            "zoho",
            "Zoho CRM",
            4,
            &["zoho", "zcrm", "lead owner", "account name"],
            vec![
                field("First Name", String, &[], Some(("contacts", "first_name"))),
                field("Last Name", String, &[], Some(("contacts", "last_name"))),
                field("Email", String, &[], Some(("contacts", "email"))),
                field("Mobile", String, &[], Some(("contacts", "mobile"))),
                field("Lead Owner", String, &["Contact Owner"], None),
                field("Lead Source", String, &[], Some(("contacts", "lead_source"))),
                field("Account Name", String, &[], Some(("companies", "name"))),
                field("Annual Revenue", Number, &[], Some(("companies", "annual_revenue"))),
            ],
        ),
        connector(
            "dynamics365",
            "Microsoft Dynamics 365",
            5,
            &["dynamics", "emailaddress1", "telephone1", "parentcustomerid", "statecode"],
            vec![
                field("firstname", String, &[], Some(("contacts", "first_name"))),
                field("lastname", String, &[], Some(("contacts", "last_name"))),
                field("emailaddress1", String, &["Email"], Some(("contacts", "email"))),
                field("telephone1", String, &["Business Phone"], Some(("contacts", "phone"))),
                field("jobtitle", String, &["Job Title"], Some(("contacts", "job_title"))),
                field("parentcustomerid", String, &["Company Name"], Some(("contacts", "company_name"))),
                field("address1_city", String, &["City"], Some(("contacts", "city"))),
            ],
        ),
        connector(
            "freshsales",
            "Freshsales",
            6,
            &["freshsales", "freshworks", "work number", "lead score"],
            vec![
                field("First name", String, &[], Some(("contacts", "first_name"))),
                field("Last name", String, &[], Some(("contacts", "last_name"))),
                field("Emails", String, &["Email"], Some(("contacts", "email"))),
                field("Work number", String, &[], Some(("contacts", "phone"))),
                field("Job title", String, &[], Some(("contacts", "job_title"))),
                field("Lead score", Number, &[], None),
            ],
        ),
        connector(
            "copper",
            "Copper",
            7,
            &["copper", "prosperworks", "interaction count"],
            vec![
                field("First Name", String, &[], Some(("contacts", "first_name"))),
                field("Last Name", String, &[], Some(("contacts", "last_name"))),
                field("Work Email", String, &["Email"], Some(("contacts", "email"))),
                field("Company", String, &[], Some(("contacts", "company_name"))),
                field("Interaction Count", Number, &[], None),
            ],
        ),
        connector(
            "insightly",
            "Insightly",
            8,
            &["insightly", "contact_id", "organisation"],
            vec![
                field("FIRST_NAME", String, &[], Some(("contacts", "first_name"))),
                field("LAST_NAME", String, &[], Some(("contacts", "last_name"))),
                field("EMAIL_ADDRESS", String, &[], Some(("contacts", "email"))),
                field("PHONE", String, &[], Some(("contacts", "phone"))),
                field("ORGANISATION_NAME", String, &["Organisation"], Some(("companies", "name"))),
            ],
        ),
        connector(
            "close",
            "Close",
            9,
            &["close.com", "lead_id", "primary_contact", "display_name"],
            vec![
                field("display_name", String, &["Lead Name"], Some(("companies", "name"))),
                field("primary_contact_name", String, &["Contact Name"], None),
                field("primary_contact_primary_email", String, &["Contact Email"], Some(("contacts", "email"))),
                field("primary_contact_primary_phone", String, &["Contact Phone"], Some(("contacts", "phone"))),
                field("status_label", String, &["Status"], Some(("contacts", "lead_status"))),
                field("url", String, &["Website"], Some(("companies", "website"))),
            ],
        ),
        connector(
            "generic",
            "Other / Generic export",
            100,
            &[],
            vec![
                field("name", String, &["full name"], None),
                field("email", String, &["e-mail", "email address"], Some(("contacts", "email"))),
                field("phone", String, &["telephone", "phone number"], Some(("contacts", "phone"))),
                field("company", String, &["organization", "account"], Some(("contacts", "company_name"))),
            ],
        ),
    ]
}

pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub key: String,
    pub confidence: f64,
}

/// Scores each active connector against the export's headers.
///
/// A header matching a known field name or alias scores one point; a header
/// containing a detection keyword scores two. The generic connector only
/// wins when nothing else reaches the threshold.
pub fn detect_connector(headers: &[String], connectors: &[Connector]) -> Option<Detection> {
    if headers.is_empty() {
        return None;
    }
    let normalized: Vec<String> = headers.iter().map(|header| normalize_name(header)).collect();
    let lowered: Vec<String> = headers.iter().map(|header| header.to_lowercase()).collect();

    let mut best: Option<(f64, &Connector)> = None;
    for connector in connectors.iter().filter(|connector| connector.is_active) {
        let mut known = Vec::new();
        for field in &connector.fields {
            known.push(normalize_name(&field.name));
            known.extend(field.aliases.iter().map(|alias| normalize_name(alias)));
        }

        let field_hits = normalized.iter().filter(|header| known.contains(header)).count() as f64;
        let keyword_hits = connector
            .detection_keywords
            .iter()
            .filter(|keyword| lowered.iter().any(|header| header.contains(keyword.as_str())))
            .count() as f64;
        let score = field_hits + 2.0 * keyword_hits;

        let better = match best {
            None => true,
            Some((best_score, best_connector)) => {
                score > best_score
                    || (score == best_score && connector.popularity_rank < best_connector.popularity_rank)
            }
        };
        if better {
            best = Some((score, connector));
        }
    }

    let (score, connector) = best?;
    if score < MIN_DETECTION_SCORE {
        return None;
    }
    let confidence = (score / (headers.len() as f64 + 2.0)).clamp(0.0, 1.0);
    Some(Detection {
        key: connector.key.clone(),
        confidence: (confidence * 100.0).round() / 100.0,
    })
}

/// Connector fields with a destination that no header (by name or alias)
/// supplies.
pub fn missing_mapped_fields<'a>(
    connector: &'a Connector,
    headers: &[String],
) -> Vec<&'a ConnectorField> {
    let normalized: Vec<String> = headers.iter().map(|header| normalize_name(header)).collect();
    connector
        .fields
        .iter()
        .filter(|field| field.destination.is_some())
        .filter(|field| {
            !std::iter::once(&field.name)
                .chain(field.aliases.iter())
                .any(|name| normalized.contains(&normalize_name(name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{detect_connector, missing_mapped_fields, normalize_name, seed_connectors};
    use crate::destination::is_known_target;

    fn headers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn seeded_destination_hints_are_valid_targets() {
        for connector in seed_connectors() {
            for field in connector.fields {
                if let Some(hint) = field.destination {
                    assert!(
                        is_known_target(&hint.table, &hint.field),
                        "{}:{} -> {}.{}",
                        connector.key,
                        field.name,
                        hint.table,
                        hint.field
                    );
                }
            }
        }
    }

    #[test]
    fn detects_hubspot_from_property_names() {
        let detection = detect_connector(
            &headers(&["Record ID", "firstname", "lastname", "email", "hs_lead_status"]),
            &seed_connectors(),
        )
        .expect("detected");
        assert_eq!(detection.key, "hubspot");
        assert!(detection.confidence > 0.0 && detection.confidence <= 1.0);
    }

    #[test]
    fn detects_salesforce_custom_fields() {
        let detection = detect_connector(
            &headers(&["FirstName", "LastName", "Region__c", "StageName"]),
            &seed_connectors(),
        )
        .expect("detected");
        assert_eq!(detection.key, "salesforce");
    }

    #[test]
    fn unrelated_headers_are_not_detected() {
        assert!(detect_connector(&headers(&["sku", "qty"]), &seed_connectors()).is_none());
        assert!(detect_connector(&[], &seed_connectors()).is_none());
    }

    #[test]
    fn aliases_satisfy_expected_fields() {
        let generic = seed_connectors()
            .into_iter()
            .find(|connector| connector.key == "generic")
            .expect("generic");
        let missing = missing_mapped_fields(&generic, &headers(&["Name", "E-Mail", "Telephone"]));
        let names: Vec<&str> = missing.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(names, vec!["company"]);
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_name("Person - Email"), "personemail");
        assert_eq!(normalize_name("first_name"), "firstname");
    }
}
