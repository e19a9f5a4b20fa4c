//! Entity and state machine for test case change trackers.
//!
//! A tracker is one pending re-grading obligation created when a test case
//! changes. Status only moves forward:
//!
//! ```text
//! pending -> in_progress -> completed
//!    |           |
//!    +-----------+------> failed
//! ```
//!
//! Every transition is a single conditional `UPDATE` guarded on the current
//! status, so two workers racing for the same tracker cannot both win, and
//! `completed_at` is only ever written together with a terminal status.

use chrono::{DateTime, Duration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{FromJsonQueryResult, PaginatorTrait, QueryOrder, QuerySelect, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{course, learning_material, question, student_score, test_case};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_case_change_trackers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Test case that changed. Not a foreign key; the test case may be gone.
    pub test_case_id: i64,
    pub question_id: i64,
    pub learning_material_id: i64,
    pub course_id: i64,

    pub change_type: ChangeType,

    /// Prior values of the changed fields, for audit only.
    #[sea_orm(column_type = "Json", nullable)]
    pub previous_data: Option<serde_json::Value>,

    /// Fixed when the tracker is created; never rewritten.
    #[sea_orm(column_type = "Json")]
    pub affected_student_ids: StudentIds,

    pub status: TrackerStatus,

    /// Earliest time the tracker may be picked up by a sweep.
    pub scheduled_at: DateTime<Utc>,

    /// Set exactly when `status` is `completed` or `failed`.
    pub completed_at: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "Json", nullable)]
    pub execution_details: Option<ExecutionDetails>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Display, EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChangeType {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "updated")]
    Updated,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Display, EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TrackerStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl TrackerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackerStatus::Completed | TrackerStatus::Failed)
    }
}

/// Ordered student ids stored as a JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct StudentIds(pub Vec<i64>);

/// Running summary of a re-execution, persisted after every student.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ExecutionDetails {
    #[serde(default)]
    pub processed: u32,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Tracker-level failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Students whose step finished; a resumed run skips them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handled_student_ids: Vec<i64>,
}

impl ExecutionDetails {
    /// Details carrying only a failure reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_handled(&self, student_id: i64) -> bool {
        self.handled_student_ids.contains(&student_id)
    }

    pub fn mark_handled(&mut self, student_id: i64) {
        if !self.is_handled(student_id) {
            self.handled_student_ids.push(student_id);
        }
    }
}

/// Containment hierarchy of the test case a tracker refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedTestCase {
    pub test_case_id: i64,
    pub question_id: i64,
    pub learning_material_id: i64,
    pub course_id: i64,
}

/// Tracker counts per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Inserts a new `pending` tracker.
    pub async fn create(
        db: &DatabaseConnection,
        target: TrackedTestCase,
        change_type: ChangeType,
        previous_data: Option<serde_json::Value>,
        affected_student_ids: Vec<i64>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            test_case_id: Set(target.test_case_id),
            question_id: Set(target.question_id),
            learning_material_id: Set(target.learning_material_id),
            course_id: Set(target.course_id),
            change_type: Set(change_type),
            previous_data: Set(previous_data),
            affected_student_ids: Set(StudentIds(affected_student_ids)),
            status: Set(TrackerStatus::Pending),
            scheduled_at: Set(scheduled_at),
            completed_at: Set(None),
            execution_details: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Records a change to `test_case` as a new tracker due
    /// `interval_hours` from now.
    ///
    /// Returns `None` without writing when the question, material or course
    /// cannot be resolved, or when no student has attempted the question.
    pub async fn record_change(
        db: &DatabaseConnection,
        test_case: &test_case::Model,
        change_type: ChangeType,
        previous_data: Option<serde_json::Value>,
        interval_hours: i64,
    ) -> Result<Option<Self>, DbErr> {
        let Some(question) = question::Model::find_by_id(db, test_case.question_id).await? else {
            tracing::warn!(
                test_case_id = test_case.id,
                "Cannot track test case changes: Question not found"
            );
            return Ok(None);
        };

        let Some(material) =
            learning_material::Model::find_by_id(db, question.learning_material_id).await?
        else {
            tracing::warn!(
                test_case_id = test_case.id,
                question_id = question.id,
                "Cannot track test case changes: Material not found"
            );
            return Ok(None);
        };

        let Some(course) = course::Model::find_by_id(db, material.course_id).await? else {
            tracing::warn!(
                test_case_id = test_case.id,
                question_id = question.id,
                material_id = material.id,
                "Cannot track test case changes: Course not found"
            );
            return Ok(None);
        };

        let affected = student_score::Model::user_ids_for_question(db, question.id).await?;
        if affected.is_empty() {
            return Ok(None);
        }

        let target = TrackedTestCase {
            test_case_id: test_case.id,
            question_id: question.id,
            learning_material_id: material.id,
            course_id: course.id,
        };
        let scheduled_at = Utc::now() + Duration::hours(interval_hours);

        let tracker =
            Self::create(db, target, change_type, previous_data, affected, scheduled_at).await?;

        tracing::info!(
            tracker_id = tracker.id,
            test_case_id = test_case.id,
            question_id = question.id,
            affected = tracker.affected_student_ids.0.len(),
            %scheduled_at,
            "Recorded test case {} change",
            change_type
        );

        Ok(Some(tracker))
    }

    pub async fn find_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    /// Pending trackers whose `scheduled_at` has elapsed, earliest first.
    pub async fn find_due(
        db: &DatabaseConnection,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(TrackerStatus::Pending))
            .filter(Column::ScheduledAt.lte(now))
            .order_by_asc(Column::ScheduledAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    /// Moves `pending -> in_progress`. Returns `false` when the tracker was
    /// not pending, meaning another invocation owns it or it already finished.
    pub async fn claim(db: &DatabaseConnection, id: i64) -> Result<bool, DbErr> {
        Self::transition(db, id, &[TrackerStatus::Pending], TrackerStatus::InProgress, None).await
    }

    /// Checkpoints `details` on an `in_progress` tracker.
    pub async fn record_progress(
        db: &DatabaseConnection,
        id: i64,
        details: &ExecutionDetails,
    ) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .set(ActiveModel {
                execution_details: Set(Some(details.clone())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(TrackerStatus::InProgress))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Moves `in_progress -> completed` with the final details.
    pub async fn mark_completed(
        db: &DatabaseConnection,
        id: i64,
        details: &ExecutionDetails,
    ) -> Result<bool, DbErr> {
        Self::transition(
            db,
            id,
            &[TrackerStatus::InProgress],
            TrackerStatus::Completed,
            Some(details),
        )
        .await
    }

    /// Moves a non-terminal tracker to `failed`.
    pub async fn mark_failed(
        db: &DatabaseConnection,
        id: i64,
        details: &ExecutionDetails,
    ) -> Result<bool, DbErr> {
        Self::transition(
            db,
            id,
            &[TrackerStatus::Pending, TrackerStatus::InProgress],
            TrackerStatus::Failed,
            Some(details),
        )
        .await
    }

    async fn transition(
        db: &DatabaseConnection,
        id: i64,
        from: &[TrackerStatus],
        to: TrackerStatus,
        details: Option<&ExecutionDetails>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let mut changes = ActiveModel {
            status: Set(to),
            updated_at: Set(now),
            ..Default::default()
        };
        if to.is_terminal() {
            changes.completed_at = Set(Some(now));
        }
        if let Some(details) = details {
            changes.execution_details = Set(Some(details.clone()));
        }

        let res = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(from.iter().copied()))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Number of trackers in each status.
    pub async fn count_by_status(db: &DatabaseConnection) -> Result<TrackerStats, DbErr> {
        let count = |status: TrackerStatus| {
            Entity::find()
                .filter(Column::Status.eq(status))
                .count(db)
        };

        Ok(TrackerStats {
            pending: count(TrackerStatus::Pending).await?,
            in_progress: count(TrackerStatus::InProgress).await?,
            completed: count(TrackerStatus::Completed).await?,
            failed: count(TrackerStatus::Failed).await?,
        })
    }

    /// Newest-first page of trackers (1-based `page`) and the total count.
    pub async fn list(
        db: &DatabaseConnection,
        status: Option<TrackerStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<Self>, u64), DbErr> {
        let mut query = Entity::find();
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(db, per_page.max(1));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    fn target() -> TrackedTestCase {
        TrackedTestCase {
            test_case_id: 11,
            question_id: 7,
            learning_material_id: 3,
            course_id: 1,
        }
    }

    async fn pending_at(db: &DatabaseConnection, scheduled_at: DateTime<Utc>) -> Model {
        Model::create(db, target(), ChangeType::Updated, None, vec![1, 2], scheduled_at)
            .await
            .expect("Failed to create tracker")
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let db = setup_test_db().await;
        let tracker = pending_at(&db, Utc::now()).await;

        assert_eq!(tracker.status, TrackerStatus::Pending);
        assert_eq!(tracker.affected_student_ids, StudentIds(vec![1, 2]));
        assert!(tracker.completed_at.is_none());
        assert!(tracker.execution_details.is_none());
    }

    #[tokio::test]
    async fn test_claim_only_succeeds_once() {
        let db = setup_test_db().await;
        let tracker = pending_at(&db, Utc::now()).await;

        assert!(Model::claim(&db, tracker.id).await.unwrap());
        assert!(!Model::claim(&db, tracker.id).await.unwrap());

        let reloaded = Model::find_by_id(&db, tracker.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TrackerStatus::InProgress);
        assert!(reloaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_completion_requires_in_progress() {
        let db = setup_test_db().await;
        let tracker = pending_at(&db, Utc::now()).await;
        let details = ExecutionDetails {
            processed: 2,
            success: 1,
            failed: 1,
            ..Default::default()
        };

        assert!(!Model::mark_completed(&db, tracker.id, &details).await.unwrap());

        Model::claim(&db, tracker.id).await.unwrap();
        assert!(Model::mark_completed(&db, tracker.id, &details).await.unwrap());

        let done = Model::find_by_id(&db, tracker.id).await.unwrap().unwrap();
        assert_eq!(done.status, TrackerStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.execution_details, Some(details));
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let db = setup_test_db().await;
        let tracker = pending_at(&db, Utc::now()).await;

        assert!(
            Model::mark_failed(&db, tracker.id, &ExecutionDetails::failure("Question not found"))
                .await
                .unwrap()
        );
        assert!(!Model::claim(&db, tracker.id).await.unwrap());
        assert!(
            !Model::mark_failed(&db, tracker.id, &ExecutionDetails::failure("again"))
                .await
                .unwrap()
        );
        assert!(
            !Model::record_progress(&db, tracker.id, &ExecutionDetails::default())
                .await
                .unwrap()
        );

        let failed = Model::find_by_id(&db, tracker.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TrackerStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert_eq!(
            failed.execution_details.unwrap().error.as_deref(),
            Some("Question not found")
        );
    }

    #[tokio::test]
    async fn test_find_due_orders_and_limits() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let late = pending_at(&db, now - Duration::hours(1)).await;
        let early = pending_at(&db, now - Duration::hours(5)).await;
        let middle = pending_at(&db, now - Duration::hours(3)).await;
        pending_at(&db, now + Duration::hours(2)).await;
        let claimed = pending_at(&db, now - Duration::hours(10)).await;
        Model::claim(&db, claimed.id).await.unwrap();

        let due = Model::find_due(&db, now, 2).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early.id, middle.id]);

        let all_due = Model::find_due(&db, now, 50).await.unwrap();
        let ids: Vec<i64> = all_due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early.id, middle.id, late.id]);
    }

    #[tokio::test]
    async fn test_count_by_status_and_list() {
        let db = setup_test_db().await;
        let a = pending_at(&db, Utc::now()).await;
        let b = pending_at(&db, Utc::now()).await;
        pending_at(&db, Utc::now()).await;
        Model::claim(&db, a.id).await.unwrap();
        Model::mark_failed(&db, b.id, &ExecutionDetails::failure("No active test cases found"))
            .await
            .unwrap();

        let stats = Model::count_by_status(&db).await.unwrap();
        assert_eq!(
            stats,
            TrackerStats {
                pending: 1,
                in_progress: 1,
                completed: 0,
                failed: 1,
            }
        );

        let (failed, total) = Model::list(&db, Some(TrackerStatus::Failed), 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(failed[0].id, b.id);

        let (page, total) = Model::list(&db, None, 2, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_execution_details_tolerates_missing_fields() {
        let details: ExecutionDetails =
            serde_json::from_str(r#"{"error":"Question not found"}"#).unwrap();
        assert_eq!(details, ExecutionDetails::failure("Question not found"));

        let mut details = ExecutionDetails::default();
        details.mark_handled(4);
        details.mark_handled(4);
        assert_eq!(details.handled_student_ids, vec![4]);
        assert!(details.is_handled(4));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TrackerStatus::InProgress.to_string(), "in_progress");
        assert_eq!(ChangeType::Deleted.to_string(), "deleted");
        assert!(TrackerStatus::Failed.is_terminal());
        assert!(!TrackerStatus::Pending.is_terminal());
    }
}
