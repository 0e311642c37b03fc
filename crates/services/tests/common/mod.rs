#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use course_core::Clock;
use course_core::catalog::Catalog;
use course_core::model::UserId;
use course_core::settings::{CourseSettings, CourseSettingsDraft};
use services::{ConnectivityMonitor, CourseServices, ProgressStore};
use storage::repository::{InMemoryProgressStore, Storage};

/// Module 1: quiz, plain, true/false quiz, plain. Module 2: two plain steps.
pub const CATALOG: &str = r#"{
    "modules": [
        {
            "id": 1,
            "title": "Foundations",
            "totalSteps": 4,
            "steps": [
                { "id": 1, "title": "What is a model", "quiz": {
                    "question": "Which one is a token?", "type": "multiple",
                    "options": ["a page", "a book", "a word piece", "a chapter"],
                    "correct": 2,
                    "correctExplanation": "Models read word pieces.",
                    "incorrectExplanation": "Think smaller."
                } },
                { "id": 2, "title": "Watch the intro" },
                { "id": 3, "title": "Myths", "quiz": {
                    "question": "Models remember every chat forever.", "type": "boolean",
                    "correct": false
                } },
                { "id": 4, "title": "Worksheet" }
            ]
        },
        {
            "id": 2,
            "title": "Prompting",
            "totalSteps": 2,
            "steps": [
                { "id": 1, "title": "Context" },
                { "id": 2, "title": "Examples" }
            ]
        }
    ]
}"#;

pub fn catalog() -> Catalog {
    Catalog::from_json(CATALOG).expect("test catalog")
}

pub fn settings() -> CourseSettings {
    CourseSettingsDraft::new().validate().expect("default settings")
}

pub fn learner() -> UserId {
    UserId::new("learner-1")
}

pub async fn open_store(
    repo: &Arc<InMemoryProgressStore>,
    connectivity: &ConnectivityMonitor,
    clock: Clock,
) -> ProgressStore {
    ProgressStore::open(
        learner(),
        repo.clone(),
        connectivity,
        Arc::new(catalog()),
        settings(),
        clock,
    )
    .await
}

pub fn course(repo: &Arc<InMemoryProgressStore>, clock: Clock) -> CourseServices {
    course_with(repo, clock, settings())
}

pub fn course_with(
    repo: &Arc<InMemoryProgressStore>,
    clock: Clock,
    settings: CourseSettings,
) -> CourseServices {
    CourseServices::new(
        Storage::with_progress(repo.clone()),
        catalog(),
        settings,
        clock,
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
