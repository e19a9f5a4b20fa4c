use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{IntoActiveModel, QueryOrder, QuerySelect, Set};

use super::execution_result;

/// Per (student, question) completion record.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "student_scores")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    /// 0 or 100 once re-graded.
    pub score: i32,
    pub completion_status: bool,
    /// The execution result that counts as this student's completed submission.
    pub completed_execution_result_id: Option<i64>,
    pub test_case_complete_count: i32,
    pub test_case_total_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::question::Entity",
        from = "Column::QuestionId",
        to = "super::question::Column::Id"
    )]
    Question,

    #[sea_orm(has_many = "super::execution_result::Entity")]
    ExecutionResult,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Question.def()
    }
}

impl Related<super::execution_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionResult.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        user_id: i64,
        question_id: i64,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            user_id: Set(user_id),
            question_id: Set(question_id),
            score: Set(0),
            completion_status: Set(false),
            completed_execution_result_id: Set(None),
            test_case_complete_count: Set(0),
            test_case_total_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_user_and_question(
        db: &DatabaseConnection,
        user_id: i64,
        question_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::QuestionId.eq(question_id))
            .one(db)
            .await
    }

    /// Every student with a score row for the question, ascending and distinct.
    pub async fn user_ids_for_question(
        db: &DatabaseConnection,
        question_id: i64,
    ) -> Result<Vec<i64>, DbErr> {
        Entity::find()
            .select_only()
            .column(Column::UserId)
            .distinct()
            .filter(Column::QuestionId.eq(question_id))
            .order_by_asc(Column::UserId)
            .into_tuple::<i64>()
            .all(db)
            .await
    }

    /// The submission whose code is authoritative for this score.
    ///
    /// The referenced completed result wins when set (even if it no longer
    /// exists); otherwise the newest result for the score is used.
    pub async fn authoritative_execution_result(
        &self,
        db: &DatabaseConnection,
    ) -> Result<Option<execution_result::Model>, DbErr> {
        match self.completed_execution_result_id {
            Some(id) => execution_result::Model::find_by_id(db, id).await,
            None => execution_result::Model::latest_for_score(db, self.id).await,
        }
    }

    /// Marks the question complete with full marks against `execution_result_id`.
    pub async fn mark_complete(
        self,
        db: &DatabaseConnection,
        execution_result_id: i64,
        passed: i32,
        total: i32,
    ) -> Result<Self, DbErr> {
        let mut active = self.into_active_model();
        active.completion_status = Set(true);
        active.score = Set(100);
        active.completed_execution_result_id = Set(Some(execution_result_id));
        active.test_case_complete_count = Set(passed);
        active.test_case_total_count = Set(total);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }

    /// Marks the question incomplete with a zero score. The completed result
    /// reference is left as-is.
    pub async fn mark_incomplete(
        self,
        db: &DatabaseConnection,
        passed: i32,
        total: i32,
    ) -> Result<Self, DbErr> {
        let mut active = self.into_active_model();
        active.completion_status = Set(false);
        active.score = Set(0);
        active.test_case_complete_count = Set(passed);
        active.test_case_total_count = Set(total);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }
}
