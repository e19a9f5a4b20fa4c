use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202605010001_create_courses::Migration),
            Box::new(migrations::m202605010002_create_learning_materials::Migration),
            Box::new(migrations::m202605010003_create_questions::Migration),
            Box::new(migrations::m202605010004_create_test_cases::Migration),
            Box::new(migrations::m202605010005_create_users::Migration),
            Box::new(migrations::m202605010006_create_student_scores::Migration),
            Box::new(migrations::m202605010007_create_execution_results::Migration),
            Box::new(migrations::m202605010008_create_test_case_change_trackers::Migration),
        ]
    }
}
