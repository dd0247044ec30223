//! Questionnaire catalog persistence

use crate::db::models::{NewQuestion, Question};
use crate::Result;
use sqlx::{Row, SqlitePool};

/// Replace the whole catalog with `questions`
///
/// Runs in one transaction so readers never observe a half-imported catalog.
pub async fn replace_questions(pool: &SqlitePool, questions: &[NewQuestion]) -> Result<usize> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM questions").execute(&mut *tx).await?;

    for question in questions {
        sqlx::query(
            r#"
            INSERT INTO questions (cod_source, question_id, dsc_type, dsc_title, is_active)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(&question.cod_source)
        .bind(&question.question_id)
        .bind(&question.dsc_type)
        .bind(&question.dsc_title)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(questions.len())
}

/// Active questions ordered by title
pub async fn list_active_questions(pool: &SqlitePool) -> Result<Vec<Question>> {
    let rows = sqlx::query(
        r#"
        SELECT id, cod_source, question_id, dsc_type, dsc_title, is_active
        FROM questions
        WHERE is_active = 1
        ORDER BY dsc_title ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Question {
                id: row.try_get("id")?,
                cod_source: row.try_get("cod_source")?,
                question_id: row.try_get("question_id")?,
                dsc_type: row.try_get("dsc_type")?,
                dsc_title: row.try_get("dsc_title")?,
                is_active: row.try_get::<i64, _>("is_active")? != 0,
            })
        })
        .collect()
}
