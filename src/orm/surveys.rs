//! SeaORM Entity for surveys table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(20))")]
#[serde(rename_all = "snake_case")]
pub enum SurveyKind {
    /// Every question is answered once.
    #[sea_orm(string_value = "single_choice")]
    SingleChoice,
    /// Standard questions are answered once per respondent row.
    #[sea_orm(string_value = "table")]
    Table,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "surveys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub kind: SurveyKind,
    #[sea_orm(column_type = "Text", nullable)]
    pub introduction: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub free_text_prompt: Option<String>,
    /// JSON object of option letter to cap, e.g. `{"A": 7}`
    #[sea_orm(column_type = "Text", nullable)]
    pub option_limits: Option<String>,
    pub table_option_count: i32,
    pub enable_quick_fill: bool,
    pub is_active: bool,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::questions::Entity")]
    Questions,
    #[sea_orm(has_many = "super::respondents::Entity")]
    Respondents,
    #[sea_orm(has_many = "super::access_tokens::Entity")]
    AccessTokens,
    #[sea_orm(has_many = "super::free_text_answers::Entity")]
    FreeTextAnswers,
}

impl Related<super::questions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Questions.def()
    }
}

impl Related<super::respondents::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Respondents.def()
    }
}

impl Related<super::access_tokens::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccessTokens.def()
    }
}

impl Related<super::free_text_answers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeTextAnswers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
