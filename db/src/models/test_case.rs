use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{IntoActiveModel, QueryOrder, Set};
use serde_json::{Map, json};
use util::config;

use super::test_case_change_tracker::{self, ChangeType};

/// An instructor-defined test case for a question.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub question_id: i64,
    /// Test source sent to the execution engine.
    pub input: String,
    pub description: Option<String>,
    pub hidden: bool,
    /// Inactive test cases are ignored when re-grading.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::question::Entity",
        from = "Column::QuestionId",
        to = "super::question::Column::Id"
    )]
    Question,
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Question.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Partial update for a test case. `None` leaves the field untouched.
#[derive(Debug, Default, Clone)]
pub struct TestCaseEdit {
    pub input: Option<String>,
    pub description: Option<Option<String>>,
    pub hidden: Option<bool>,
    pub active: Option<bool>,
}

impl Model {
    /// Creates a test case and records a `created` change for its question.
    pub async fn create(
        db: &DatabaseConnection,
        question_id: i64,
        input: &str,
        description: Option<&str>,
        hidden: bool,
        active: bool,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let created = ActiveModel {
            question_id: Set(question_id),
            input: Set(input.to_owned()),
            description: Set(description.map(str::to_owned)),
            hidden: Set(hidden),
            active: Set(active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        track(db, &created, ChangeType::Created, None).await;
        Ok(created)
    }

    pub async fn find_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    /// Active test cases of a question in creation order.
    pub async fn find_active_by_question(
        db: &DatabaseConnection,
        question_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .filter(Column::QuestionId.eq(question_id))
            .filter(Column::Active.eq(true))
            .order_by_asc(Column::Id)
            .all(db)
            .await
    }

    /// Applies `edit` and records an `updated` change when `input`, `hidden`
    /// or `active` changed. `previous_data` holds the prior values of every
    /// changed field.
    pub async fn edit(
        db: &DatabaseConnection,
        id: i64,
        edit: TestCaseEdit,
    ) -> Result<Self, DbErr> {
        let Some(current) = Self::find_by_id(db, id).await? else {
            return Err(DbErr::RecordNotFound("Test case not found".into()));
        };

        let mut previous = Map::new();
        let mut relevant = false;
        let mut active = current.clone().into_active_model();

        if let Some(input) = edit.input.filter(|v| *v != current.input) {
            previous.insert("input".into(), json!(current.input));
            active.input = Set(input);
            relevant = true;
        }
        if let Some(description) = edit.description.filter(|v| *v != current.description) {
            previous.insert("description".into(), json!(current.description));
            active.description = Set(description);
        }
        if let Some(hidden) = edit.hidden.filter(|v| *v != current.hidden) {
            previous.insert("hidden".into(), json!(current.hidden));
            active.hidden = Set(hidden);
            relevant = true;
        }
        if let Some(is_active) = edit.active.filter(|v| *v != current.active) {
            previous.insert("active".into(), json!(current.active));
            active.active = Set(is_active);
            relevant = true;
        }

        if previous.is_empty() {
            return Ok(current);
        }

        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        if relevant {
            track(db, &updated, ChangeType::Updated, Some(previous.into())).await;
        }
        Ok(updated)
    }

    /// Deletes a test case and records a `deleted` change.
    pub async fn delete(db: &DatabaseConnection, id: i64) -> Result<(), DbErr> {
        let Some(test_case) = Self::find_by_id(db, id).await? else {
            return Err(DbErr::RecordNotFound("Test case not found".into()));
        };

        Entity::delete_by_id(id).exec(db).await?;
        track(db, &test_case, ChangeType::Deleted, None).await;
        Ok(())
    }
}

/// Records a change tracker for `test_case`. Failures are logged, never
/// propagated to the test case mutation.
async fn track(
    db: &DatabaseConnection,
    test_case: &Model,
    change_type: ChangeType,
    previous_data: Option<serde_json::Value>,
) {
    let interval = config::reexecution_interval_hours();
    if let Err(e) = test_case_change_tracker::Model::record_change(
        db,
        test_case,
        change_type,
        previous_data,
        interval,
    )
    .await
    {
        tracing::error!(
            test_case_id = test_case.id,
            error = %e,
            "Error tracking test case {}",
            change_type
        );
    }
}
