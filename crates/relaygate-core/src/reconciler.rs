use relaygate_protocol::canonicalize_json;

/// A fully-assembled tool call, ready for dialect encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// Merges native tool-call fragments (from the frame parser) with synthetic
/// ones (from bracket extraction over accumulated text), per §4.3.
/// Deduplicates on `(name, canonicalised_arguments)`; native order wins ties
/// against synthetic duplicates. Assigns dense 0-based indices.
pub fn reconcile(native: &[(String, String, String)], synthetic: &[(String, String)]) -> Vec<ToolCall> {
    let mut seen = std::collections::HashSet::new();
    let mut calls = Vec::new();

    for (id, name, args_json) in native {
        let key = dedup_key(name, args_json);
        if !seen.insert(key) {
            continue;
        }
        calls.push((id.clone(), name.clone(), args_json.clone()));
    }

    for (name, args_json) in synthetic {
        let key = dedup_key(name, args_json);
        if !seen.insert(key) {
            continue;
        }
        let id = format!("synthetic_{}", calls.len());
        calls.push((id, name.clone(), args_json.clone()));
    }

    calls
        .into_iter()
        .enumerate()
        .map(|(index, (id, name, arguments_json))| ToolCall {
            index: index as u32,
            id,
            name,
            arguments_json,
        })
        .collect()
}

fn dedup_key(name: &str, args_json: &str) -> (String, String) {
    let canonical_args = serde_json::from_str(args_json)
        .map(|v| canonicalize_json(&v))
        .unwrap_or_else(|_| args_json.to_string());
    (name.to_string(), canonical_args)
}
