//! Screenplay fixtures and a mock analysis service

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use wiremock::{Request, Respond, ResponseTemplate};

/// Three scenes: the first two share ANNA, the last is BEN and CARL
pub const SHORT_SCRIPT: &str = "\
INT. KITCHEN - NIGHT

ANNA
Who left the light on?

BEN
Not me.

EXT. GARDEN - CONTINUOUS

ANNA
Ben?

INT. GARAGE - LATER

BEN
Help me with this.

CARL
Fine.
";

/// Mock analysis endpoint that reports speaker cues as characters
///
/// Units whose text contains a poisoned marker get a 422 until [`heal`](Self::heal) is called.
/// Clones share state, so a test keeps one handle while the mock server owns another.
#[derive(Clone, Default)]
pub struct CueService {
    poisoned: Arc<Mutex<HashSet<String>>>,
    requests: Arc<AtomicUsize>,
}

impl CueService {
    pub fn poisoned(markers: &[&str]) -> Self {
        Self {
            poisoned: Arc::new(Mutex::new(markers.iter().map(|m| m.to_string()).collect())),
            ..Self::default()
        }
    }

    pub fn heal(&self) {
        self.poisoned.lock().unwrap().clear();
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Respond for CueService {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let text = body["text"].as_str().unwrap_or_default();

        if self
            .poisoned
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker.as_str()))
        {
            return ResponseTemplate::new(422).set_body_string("unreadable scene");
        }

        let characters: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| {
                !line.is_empty()
                    && !line.starts_with("INT.")
                    && !line.starts_with("EXT.")
                    && line.chars().all(|c| c.is_ascii_uppercase() || c == ' ')
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "unitId": body["unitId"],
            "characters": characters,
        }))
    }
}
