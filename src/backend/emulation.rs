// Local emulation of the data service, shared by the in-memory and file backends

use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{FetchError, Method, Resource, UploadFile};
use crate::{
    report::{ReportDocument, ReportStatus},
    session::{SessionId, SessionSummary},
    upload::{TrackMilestones, UploadReceipt},
};

/// Key/value view over wherever the emulated service keeps its resources.
pub(crate) trait ResourceMap {
    fn get(&self, key: &str) -> Result<Option<Value>, FetchError>;
    fn put(&mut self, key: &str, value: Value) -> Result<(), FetchError>;
    fn remove(&mut self, key: &str) -> Result<bool, FetchError>;
}

/// Header a telemetry file may carry on its first line.
#[derive(Deserialize, Default)]
#[serde(default)]
struct TelemetryHeader {
    track_name: Option<String>,
    best_lap_time_s: Option<f32>,
    lap_count: Option<u32>,
}

pub(crate) fn fetch(map: &dyn ResourceMap, resource: &Resource) -> Result<Value, FetchError> {
    match resource {
        // an empty list is a valid answer before anything was uploaded
        Resource::Sessions => Ok(map.get(&resource.key())?.unwrap_or_else(|| json!([]))),
        _ => map.get(&resource.key())?.ok_or(FetchError::NotFound),
    }
}

pub(crate) fn mutate(
    map: &mut dyn ResourceMap,
    method: Method,
    resource: &Resource,
    body: Value,
) -> Result<Value, FetchError> {
    debug!("Emulated {:?} {}", method, resource);
    match (method, resource) {
        (Method::Post, Resource::Report(session_id)) => {
            let document = ReportDocument {
                session_id: session_id.clone(),
                status: ReportStatus::Generating,
                content: None,
                error: None,
            };
            let value = to_value(&document)?;
            map.put(&resource.key(), value.clone())?;
            Ok(value)
        }
        (Method::Post, Resource::Upload) => {
            let files: Vec<UploadFile> =
                serde_json::from_value(body).map_err(|e| FetchError::failed(e.to_string()))?;
            register_upload(map, files)
        }
        (Method::Post, Resource::CoachChat(session_id)) => {
            let question = body
                .get("question")
                .and_then(Value::as_str)
                .ok_or_else(|| FetchError::failed("missing question"))?
                .to_string();
            let reply = json!({
                "role": "assistant",
                "content": format!("Reviewing session {session_id}: {question}"),
            });
            let mut thread = map
                .get(&resource.key())?
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            thread.push(json!({ "role": "user", "content": question }));
            thread.push(reply.clone());
            map.put(&resource.key(), Value::Array(thread))?;
            Ok(reply)
        }
        (Method::Delete, Resource::Session(session_id)) => {
            let mut sessions = load_sessions(map)?;
            let before = sessions.len();
            sessions.retain(|s| &s.session_id != session_id);
            if sessions.len() == before {
                return Err(FetchError::NotFound);
            }
            map.put(&Resource::Sessions.key(), to_value(&sessions)?)?;
            map.remove(&resource.key())?;
            map.remove(&Resource::Report(session_id.clone()).key())?;
            Ok(Value::Null)
        }
        (Method::Delete, _) => {
            if map.remove(&resource.key())? {
                Ok(Value::Null)
            } else {
                Err(FetchError::NotFound)
            }
        }
        (Method::Post | Method::Put, _) => {
            map.put(&resource.key(), body.clone())?;
            Ok(body)
        }
    }
}

fn register_upload(map: &mut dyn ResourceMap, files: Vec<UploadFile>) -> Result<Value, FetchError> {
    if files.is_empty() {
        return Err(FetchError::failed("no files in upload"));
    }

    let mut sessions = load_sessions(map)?;
    let mut receipt = UploadReceipt::default();

    for file in files {
        let header: TelemetryHeader = file
            .contents
            .lines()
            .next()
            .and_then(|line| serde_json::from_str(line).ok())
            .unwrap_or_default();
        let track_name = header.track_name.unwrap_or_else(|| "Unknown".to_string());

        let session_id = next_session_id(&sessions);
        let summary = SessionSummary {
            session_id: session_id.clone(),
            track_name: track_name.clone(),
            file_name: file.name,
            lap_count: header.lap_count.unwrap_or(0),
            best_lap_time_s: header.best_lap_time_s,
        };
        map.put(&Resource::Session(session_id.clone()).key(), to_value(&summary)?)?;
        // the service lists newest first
        sessions.insert(0, summary);

        if let Some(lap_time) = header.best_lap_time_s {
            record_milestone(map, &track_name, &session_id, lap_time)?;
        }
        if receipt.track_name.is_none() {
            receipt.track_name = Some(track_name);
        }
        receipt.session_ids.push(session_id);
    }

    map.put(&Resource::Sessions.key(), to_value(&sessions)?)?;
    to_value(&receipt)
}

fn record_milestone(
    map: &mut dyn ResourceMap,
    track_name: &str,
    session_id: &SessionId,
    lap_time_s: f32,
) -> Result<(), FetchError> {
    let resource = Resource::Milestones {
        track: track_name.to_string(),
    };
    let mut milestones: TrackMilestones = match map.get(&resource.key())? {
        Some(value) => serde_json::from_value(value).map_err(|e| FetchError::failed(e.to_string()))?,
        None => TrackMilestones {
            track_name: track_name.to_string(),
            ..Default::default()
        },
    };
    let improved = milestones
        .personal_best_lap_s
        .map(|best| lap_time_s < best)
        .unwrap_or(true);
    if improved {
        milestones.personal_best_lap_s = Some(lap_time_s);
        milestones.personal_best_session = Some(session_id.clone());
        map.put(&resource.key(), to_value(&milestones)?)?;
    }
    Ok(())
}

fn load_sessions(map: &dyn ResourceMap) -> Result<Vec<SessionSummary>, FetchError> {
    match map.get(&Resource::Sessions.key())? {
        Some(value) => serde_json::from_value(value).map_err(|e| FetchError::failed(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn next_session_id(sessions: &[SessionSummary]) -> SessionId {
    let mut n = sessions.len() + 1;
    loop {
        let candidate = SessionId::from(format!("s{n:04}"));
        if !sessions.iter().any(|s| s.session_id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, FetchError> {
    serde_json::to_value(value).map_err(|e| FetchError::failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    type MapStore = HashMap<String, Value>;

    fn telemetry_file(name: &str, track: &str, best: f32) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            contents: format!(
                "{{\"track_name\":\"{track}\",\"best_lap_time_s\":{best},\"lap_count\":8}}\n{{}}"
            ),
        }
    }

    #[test]
    fn test_upload_registers_sessions_and_milestone() {
        let mut map = MapStore::default();
        let body = serde_json::to_value(vec![
            telemetry_file("a.jsonl", "Laguna Seca", 82.5),
            telemetry_file("b.jsonl", "Laguna Seca", 81.9),
        ])
        .unwrap();

        let receipt = mutate(&mut map, Method::Post, &Resource::Upload, body).unwrap();
        let receipt: UploadReceipt = serde_json::from_value(receipt).unwrap();
        assert_eq!(receipt.session_ids.len(), 2);
        assert_eq!(receipt.track_name.as_deref(), Some("Laguna Seca"));

        let milestones = fetch(
            &map,
            &Resource::Milestones {
                track: "Laguna Seca".to_string(),
            },
        )
        .unwrap();
        let milestones: TrackMilestones = serde_json::from_value(milestones).unwrap();
        assert_eq!(milestones.personal_best_session, Some(receipt.session_ids[1].clone()));
    }

    #[test]
    fn test_sessions_default_to_empty_list() {
        let map = MapStore::default();
        assert_eq!(fetch(&map, &Resource::Sessions).unwrap(), json!([]));
        assert_eq!(
            fetch(&map, &Resource::Report(SessionId::from("x"))),
            Err(FetchError::NotFound)
        );
    }

    #[test]
    fn test_deleting_unknown_session_is_not_found() {
        let mut map = MapStore::default();
        let result = mutate(
            &mut map,
            Method::Delete,
            &Resource::Session(SessionId::from("missing")),
            Value::Null,
        );
        assert_eq!(result, Err(FetchError::NotFound));
    }
}
