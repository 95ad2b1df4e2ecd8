//! SeaORM Entity for participants table

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "participants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// Argon2 PHC string derived from the access token
    pub secret_hash: String,
    #[sea_orm(unique)]
    pub token: String,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::votes::Entity")]
    Votes,
    #[sea_orm(has_many = "super::free_text_answers::Entity")]
    FreeTextAnswers,
}

impl Related<super::votes::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Votes.def()
    }
}

impl Related<super::free_text_answers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeTextAnswers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
