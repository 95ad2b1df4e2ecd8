//! Integration tests for admin survey editing

mod common;

use common::{database::*, fixtures::*};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use votesite::editor::{self, EditError, MoveDirection, COPY_SUFFIX};
use votesite::orm::{access_tokens, questions, votes};
use votesite::orm::surveys::SurveyKind;
use votesite::vote::{self, AnswerKey, OptionTally, SeaOrmStore, Submission, VoteStore};

fn contents(def: &votesite::survey::SurveyDef) -> Vec<String> {
    def.questions.iter().map(|q| q.content.clone()).collect()
}

#[actix_rt::test]
async fn test_import_appends_in_order() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 2, &[]).await.unwrap();

    let added = editor::import_questions(&db, def.id(), "Third\n\n  Fourth  \n", Some(3))
        .await
        .unwrap();
    assert_eq!(added, 2);

    let def = reload(&db, def.id()).await.unwrap();
    assert_eq!(contents(&def), vec!["Question 1", "Question 2", "Third", "Fourth"]);
    assert_eq!(def.questions[3].option_count, Some(3));
}

#[actix_rt::test]
async fn test_move_question_renumbers() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 4, &[]).await.unwrap();
    let last = def.questions[3].id;
    let first = def.questions[0].id;

    editor::move_question(&db, last, MoveDirection::Top).await.unwrap();
    let def = reload(&db, def.id()).await.unwrap();
    assert_eq!(
        contents(&def),
        vec!["Question 4", "Question 1", "Question 2", "Question 3"]
    );
    let indexes: Vec<i32> = def.questions.iter().map(|q| q.order_index).collect();
    assert_eq!(indexes, vec![1, 2, 3, 4]);

    editor::move_question(&db, first, MoveDirection::Down).await.unwrap();
    let def = reload(&db, def.id()).await.unwrap();
    assert_eq!(
        contents(&def),
        vec!["Question 4", "Question 2", "Question 1", "Question 3"]
    );

    let top = def.questions[0].id;
    assert!(matches!(
        editor::move_question(&db, top, MoveDirection::Up).await,
        Err(EditError::Invalid(_))
    ));
}

#[actix_rt::test]
async fn test_respondents_only_for_tables() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 1, &[]).await.unwrap();

    assert!(matches!(
        editor::import_respondents(&db, def.id(), "Ann\nBo").await,
        Err(EditError::Invalid(_))
    ));
}

#[actix_rt::test]
async fn test_custom_component_needs_an_option() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_table_survey(&db, 1, 1, &[], &[]).await.unwrap();

    let result = editor::add_custom_component(&db, def.id(), "Role", Default::default()).await;
    assert!(matches!(result, Err(EditError::Invalid(_))));

    let def = create_table_survey(&db, 1, 1, &[&["Z", "Y"]], &[]).await.unwrap();
    let custom: Vec<_> = def.custom_questions().collect();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].option_count, Some(2));
}

#[actix_rt::test]
async fn test_copy_survey_brings_structure_not_votes() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_table_survey(&db, 2, 3, &[&["Z"]], &[("A", 4)]).await.unwrap();

    let copy = editor::copy_survey(&db, def.id()).await.unwrap();
    assert_eq!(copy.name, format!("{}{}", def.survey.name, COPY_SUFFIX));
    assert_eq!(copy.kind, SurveyKind::Table);

    let copied = reload(&db, copy.id).await.unwrap();
    assert_eq!(contents(&copied), contents(&def));
    assert_eq!(copied.respondents.len(), 3);
    assert_eq!(copied.custom_questions().count(), 1);
    assert_eq!(copied.option_limits().get("A"), Some(&4));
}

#[actix_rt::test]
async fn test_delete_question_removes_its_votes() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 2, &[]).await.unwrap();
    let participant = create_participant(&db, def.id()).await.unwrap();

    let submission = def.questions.iter().fold(Submission::new(), |s, q| {
        s.with_answer(AnswerKey::Question(q.id), "A")
    });
    let batch =
        vote::validate_and_assemble(&def, participant, &submission, &OptionTally::new()).unwrap();
    SeaOrmStore::new(db.clone())
        .replace_votes(def.kind(), &batch)
        .await
        .unwrap();

    let doomed = def.questions[0].id;
    let survey_id = editor::delete_question(&db, doomed).await.unwrap();
    assert_eq!(survey_id, def.id());

    let left = votes::Entity::find()
        .filter(votes::Column::ParticipantId.eq(participant))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert!(left.iter().all(|v| v.question_id != doomed));
}

#[actix_rt::test]
async fn test_delete_survey_cascades() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_table_survey(&db, 1, 2, &[], &[]).await.unwrap();
    create_participant(&db, def.id()).await.unwrap();

    editor::delete_survey(&db, def.id()).await.unwrap();

    assert!(votesite::survey::load_survey(&db, def.id()).await.unwrap().is_none());
    let questions_left = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(def.id()))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(questions_left, 0);
    let tokens_left = access_tokens::Entity::find()
        .filter(access_tokens::Column::SurveyId.eq(def.id()))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(tokens_left, 0);
    assert!(matches!(
        editor::delete_survey(&db, def.id()).await,
        Err(EditError::NotFound(_))
    ));
}

#[actix_rt::test]
async fn test_delete_questions_together() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 3, &[]).await.unwrap();
    let participant = create_participant(&db, def.id()).await.unwrap();

    let submission = def.questions.iter().fold(Submission::new(), |s, q| {
        s.with_answer(AnswerKey::Question(q.id), "B")
    });
    let batch =
        vote::validate_and_assemble(&def, participant, &submission, &OptionTally::new()).unwrap();
    SeaOrmStore::new(db.clone())
        .replace_votes(def.kind(), &batch)
        .await
        .unwrap();

    let doomed = [def.questions[0].id, def.questions[2].id];
    let removed = editor::delete_questions(&db, def.id(), &doomed).await.unwrap();
    assert_eq!(removed, 2);

    let def = reload(&db, def.id()).await.unwrap();
    assert_eq!(contents(&def), vec!["Question 2"]);
    let left = votes::Entity::find()
        .filter(votes::Column::ParticipantId.eq(participant))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].question_id, def.questions[0].id);
}

#[actix_rt::test]
async fn test_delete_questions_refuses_mixed_or_missing_ids() {
    let db = setup_test_database()
        .await
        .expect("Failed to connect to test database");
    let def = create_single_choice_survey(&db, 2, &[]).await.unwrap();
    let other = create_single_choice_survey(&db, 1, &[]).await.unwrap();

    let mixed = [def.questions[0].id, other.questions[0].id];
    assert!(matches!(
        editor::delete_questions(&db, def.id(), &mixed).await,
        Err(EditError::Invalid(_))
    ));

    let missing = [def.questions[0].id, 9999];
    assert!(matches!(
        editor::delete_questions(&db, def.id(), &missing).await,
        Err(EditError::NotFound(_))
    ));

    assert!(matches!(
        editor::delete_questions(&db, def.id(), &[]).await,
        Err(EditError::Invalid(_))
    ));

    // Nothing was deleted by the refused requests.
    assert_eq!(reload(&db, def.id()).await.unwrap().questions.len(), 2);
    assert_eq!(reload(&db, other.id()).await.unwrap().questions.len(), 1);
}
