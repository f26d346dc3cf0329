use civicfix_core::{AuthorityDirectory, IssueCategory};
use serde_json::{json, Value};

/// Fixed audit instructions with the authority directory embedded as the
/// routing database.
pub fn instruction_text(directory: &AuthorityDirectory) -> String {
    let roads = IssueCategory::RoadsAndGarbage.label();
    let water = IssueCategory::WaterAndSewage.label();
    let power = IssueCategory::Electricity.label();
    let traffic = IssueCategory::Traffic.label();

    format!(
        "You are a Senior Civil Engineer and AI Solutions Architect specializing in Indian civic \
infrastructure. Analyze the provided image of a potential civic issue.\n\n\
STRICT INSTRUCTIONS:\n\
0. GATEKEEPER: If the image does not show a genuine civic infrastructure problem, set \
\"isCivicIssue\" to false, explain why in \"error\", and leave every other field empty.\n\n\
1. DETECT THE ISSUE: Identify the specific type (Pothole, Garbage, Water Leak, or Electric Hazard) \
and set \"issueCategory\" to exactly one of the category names in the database below.\n\n\
2. ROUTE THE AUTHORITY & EMAIL:\n\
   Use the following REAL-WORLD JURISDICTION DATABASE for selecting the targetAuthority and authorityEmail:\n\
{directory_json}\n\n\
   MAPPING RULES:\n\
   - If Road/Pothole or Garbage -> Use \"{roads}\".\n\
   - If Water Leak/Drain -> Use \"{water}\".\n\
   - If Wire/Pole/Electricity -> Use \"{power}\".\n\
   - If Traffic related -> Use \"{traffic}\".\n\
   - For the chosen category, look up the user's location in its \"zones\" using an exact match. \
If found, use that email. Otherwise, use the \"default\" email.\n\
   - targetAuthority is the category name; authorityEmail is the resolved email.\n\n\
3. AUDIT: Identify issue dimensions, severity (1-10), materials needed, time to fix, and fair \
market repair cost in INR (2024-25 standards).\n\n\
4. WRITE THE LETTER (formalEmail):\n\
   - Generate a formal, professional complaint letter.\n\
   - Subject: \"URGENT: Safety Hazard Report - [Issue Name] at [Location]\"\n\
   - Body: Must include technical findings (Dimensions, Severity Score, Estimated Cost) and a \
formal request for intervention.\n\n\
5. WRITE THE BROADCAST (viralTweet): one short, factual public post about the issue, under 200 \
characters, without hashtags or handles.\n\n\
Return the response strictly as JSON. Ensure 'costINR' and 'severity' are numbers.",
        directory_json = directory.to_pretty_json(),
    )
}

/// Instruction text followed by the location the user reported.
pub fn user_text(directory: &AuthorityDirectory, location: &str) -> String {
    format!("{}\n\nLocation context: {}", instruction_text(directory), location)
}

/// Declared reply shape: every audit field, only `isCivicIssue` required.
pub fn response_schema() -> Value {
    let categories: Vec<&str> = IssueCategory::ALL.iter().map(|c| c.label()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "isCivicIssue": { "type": "BOOLEAN" },
            "error": { "type": "STRING", "description": "Description if not a civic issue." },
            "issueName": { "type": "STRING" },
            "issueCategory": {
                "type": "STRING",
                "enum": categories,
                "description": "Directory category the issue belongs to."
            },
            "targetAuthority": {
                "type": "STRING",
                "description": "The specific office/person this issue is routed to."
            },
            "authorityEmail": {
                "type": "STRING",
                "description": "The official email address from the database."
            },
            "dimensions": { "type": "STRING" },
            "severity": { "type": "NUMBER" },
            "materialNeeded": { "type": "STRING" },
            "costINR": { "type": "NUMBER" },
            "timeToFix": { "type": "STRING" },
            "formalEmail": { "type": "STRING", "description": "The complete formal complaint letter." },
            "viralTweet": { "type": "STRING" }
        },
        "required": ["isCivicIssue"]
    })
}
