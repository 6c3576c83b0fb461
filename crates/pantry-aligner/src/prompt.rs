use serde_json::{json, Value};

const SYSTEM_PROMPT: &str = r#"You are a data alignment engine for a food-assistance and human-services
directory. Given raw scraped content describing an organization, extract the
Human Services Data Specification (HSDS) entities it describes: one
organization, zero or more locations, and zero or more services.

Only extract information that is actually present or strongly implied by the
content. Leave fields null rather than guessing. A location's `location_index`
links on services must refer to a location present in the `locations` array."#;

/// The JSON schema the LLM is instructed to conform its response to. Kept
/// intentionally small relative to the full `HsdsPayload` struct: these are
/// the fields an LLM can reasonably populate from scraped text, while
/// system-assigned fields (ids, validation state) are never requested.
pub fn hsds_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "organization": {
                "type": ["object", "null"],
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": ["string", "null"]},
                    "url": {"type": ["string", "null"]},
                    "email": {"type": ["string", "null"]},
                    "year_incorporated": {"type": ["integer", "null"]},
                    "legal_status": {"type": ["string", "null"]},
                    "tax_id": {"type": ["string", "null"]}
                },
                "required": ["name"]
            },
            "locations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": ["string", "null"]},
                        "description": {"type": ["string", "null"]},
                        "latitude": {"type": ["number", "null"]},
                        "longitude": {"type": ["number", "null"]},
                        "address": {"type": ["string", "null"]},
                        "city": {"type": ["string", "null"]},
                        "state": {"type": ["string", "null"]},
                        "postal_code": {"type": ["string", "null"]},
                        "location_type": {"type": ["string", "null"], "enum": ["physical", "postal", "virtual", null]}
                    }
                }
            },
            "services": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": ["string", "null"]},
                        "status": {"type": ["string", "null"], "enum": ["active", "inactive", "defunct", "temporarily closed", null]},
                        "eligibility_description": {"type": ["string", "null"]},
                        "location_index": {"type": ["integer", "null"]}
                    },
                    "required": ["name"]
                }
            }
        },
        "required": ["locations", "services"]
    })
}

/// Build the user-turn prompt. When a prior attempt scored below
/// `align_min_confidence`, `corrective_context` carries the specific
/// coherence issues found so the retry can target them instead of
/// resampling blind.
pub fn build_prompt(raw_content: &str, source_url: Option<&str>, corrective_context: Option<&[String]>) -> String {
    let mut prompt = String::new();
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\n");

    if let Some(url) = source_url {
        prompt.push_str(&format!("Source URL: {url}\n\n"));
    }

    if let Some(issues) = corrective_context {
        prompt.push_str("The previous extraction had the following problems — correct them:\n");
        for issue in issues {
            prompt.push_str(&format!("- {issue}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str("Content:\n");
    prompt.push_str(raw_content);
    prompt
}
