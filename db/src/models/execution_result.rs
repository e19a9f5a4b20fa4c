use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{QueryOrder, Set};

/// One code submission by a student for a question, with its last test counts.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "execution_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub student_score_id: i64,
    /// The submitted source code.
    pub code: String,
    pub compile_status: bool,
    pub test_case_complete_count: i32,
    pub test_case_total_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student_score::Entity",
        from = "Column::StudentScoreId",
        to = "super::student_score::Column::Id"
    )]
    StudentScore,
}

impl Related<super::student_score::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentScore.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        student_score_id: i64,
        code: &str,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            student_score_id: Set(student_score_id),
            code: Set(code.to_owned()),
            compile_status: Set(true),
            test_case_complete_count: Set(0),
            test_case_total_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    /// Most recently created result for a score record.
    pub async fn latest_for_score(
        db: &DatabaseConnection,
        student_score_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::StudentScoreId.eq(student_score_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .one(db)
            .await
    }

    /// True when there is source code to run.
    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }
}
