use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;

/// A coding question students submit code against.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "questions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Learning material this question belongs to.
    pub learning_material_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::learning_material::Entity",
        from = "Column::LearningMaterialId",
        to = "super::learning_material::Column::Id"
    )]
    LearningMaterial,

    #[sea_orm(has_many = "super::test_case::Entity")]
    TestCase,

    #[sea_orm(has_many = "super::student_score::Entity")]
    StudentScore,
}

impl Related<super::learning_material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LearningMaterial.def()
    }
}

impl Related<super::test_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestCase.def()
    }
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
        learning_material_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            learning_material_id: Set(learning_material_id),
            title: Set(title.to_owned()),
            description: Set(description.map(str::to_owned)),
            active: Set(true),
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
}
