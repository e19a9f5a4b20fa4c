#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use code_runner::{ExecutionEngine, ExecutionError, ExecutionEvent, ExecutionRequest, TestStats};
use db::models::test_case_change_tracker::{self, ChangeType, TrackedTestCase};
use db::models::{
    course, execution_result, learning_material, question, student_score, test_case, user,
};
use scheduler::DispatchTarget;
use sea_orm::DatabaseConnection;

/// What the stub engine answers for one student.
#[derive(Clone, Debug)]
pub enum Reply {
    Stats { total: u32, success: u32 },
    Unreachable,
    NoStats,
    Panic,
}

/// Engine stub answering per student and recording every request.
#[derive(Default)]
pub struct ScriptedEngine {
    replies: HashMap<i64, Reply>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<ExecutionRequest>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, student_id: i64, reply: Reply) -> Self {
        self.replies.insert(student_id, reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls_for(&self, student_id: i64) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.student_id == student_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ExecutionEvent>, ExecutionError> {
        self.requests.lock().unwrap().push(request.clone());

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .replies
            .get(&request.student_id)
            .cloned()
            .unwrap_or(Reply::Stats { total: 1, success: 1 });

        match reply {
            Reply::Stats { total, success } => Ok(vec![
                ExecutionEvent::Text {
                    content: "ran".into(),
                },
                ExecutionEvent::TestStats(TestStats {
                    total,
                    success,
                    fail: total.saturating_sub(success),
                }),
            ]),
            Reply::Unreachable => Err(ExecutionError::Transport("connection refused".into())),
            Reply::NoStats => Ok(vec![ExecutionEvent::Error {
                content: "NameError: name 'x' is not defined".into(),
            }]),
            Reply::Panic => panic!("engine crashed"),
        }
    }
}

/// Records dispatched tracker ids instead of running them.
#[derive(Default)]
pub struct RecordingTarget {
    pub dispatched: Mutex<Vec<i64>>,
}

impl DispatchTarget for RecordingTarget {
    fn dispatch(&self, tracker_id: i64) {
        self.dispatched.lock().unwrap().push(tracker_id);
    }
}

impl RecordingTarget {
    pub fn ids(&self) -> Vec<i64> {
        self.dispatched.lock().unwrap().clone()
    }
}

/// A question and its place in the course hierarchy.
pub struct Fixture {
    pub question: question::Model,
    pub material_id: i64,
    pub course_id: i64,
}

impl Fixture {
    pub fn target(&self, test_case_id: i64) -> TrackedTestCase {
        TrackedTestCase {
            test_case_id,
            question_id: self.question.id,
            learning_material_id: self.material_id,
            course_id: self.course_id,
        }
    }
}

pub async fn seed_question(db: &DatabaseConnection) -> Fixture {
    let course = course::Model::create(db, "Data Science 101").await.unwrap();
    let material = learning_material::Model::create(db, course.id, "NumPy basics")
        .await
        .unwrap();
    let question = question::Model::create(db, material.id, "Vector sum", None)
        .await
        .unwrap();

    Fixture {
        question,
        material_id: material.id,
        course_id: course.id,
    }
}

/// Adds an active test case before any student exists, so no tracker is recorded.
pub async fn add_test_case(
    db: &DatabaseConnection,
    question_id: i64,
    input: &str,
) -> test_case::Model {
    test_case::Model::create(db, question_id, input, None, true, true)
        .await
        .unwrap()
}

/// A student with a score for the question and, when `code` is given, one submission.
pub async fn add_student(
    db: &DatabaseConnection,
    question_id: i64,
    username: &str,
    code: Option<&str>,
) -> (user::Model, student_score::Model) {
    let student = user::Model::create(db, username).await.unwrap();
    let score = student_score::Model::create(db, student.id, question_id)
        .await
        .unwrap();
    if let Some(code) = code {
        execution_result::Model::create(db, score.id, code).await.unwrap();
    }
    (student, score)
}

/// A pending tracker that became due an hour ago.
pub async fn due_tracker(
    db: &DatabaseConnection,
    fixture: &Fixture,
    test_case_id: i64,
    students: Vec<i64>,
) -> test_case_change_tracker::Model {
    tracker_due_in(db, fixture, test_case_id, students, -1).await
}

pub async fn tracker_due_in(
    db: &DatabaseConnection,
    fixture: &Fixture,
    test_case_id: i64,
    students: Vec<i64>,
    hours: i64,
) -> test_case_change_tracker::Model {
    test_case_change_tracker::Model::create(
        db,
        fixture.target(test_case_id),
        ChangeType::Updated,
        None,
        students,
        Utc::now() + ChronoDuration::hours(hours),
    )
    .await
    .unwrap()
}

pub async fn reload_score(
    db: &DatabaseConnection,
    user_id: i64,
    question_id: i64,
) -> student_score::Model {
    student_score::Model::find_by_user_and_question(db, user_id, question_id)
        .await
        .unwrap()
        .expect("score should exist")
}

pub async fn reload_tracker(db: &DatabaseConnection, id: i64) -> test_case_change_tracker::Model {
    test_case_change_tracker::Model::find_by_id(db, id)
        .await
        .unwrap()
        .expect("tracker should exist")
}

pub fn shared(engine: ScriptedEngine) -> (Arc<ScriptedEngine>, Arc<dyn ExecutionEngine>) {
    let engine = Arc::new(engine);
    let as_dyn: Arc<dyn ExecutionEngine> = engine.clone();
    (engine, as_dyn)
}
