//! Deterministic grading of raw answers against a published test.
//!
//! The arithmetic here is mirrored by the test-solution circuit: a grade computed natively and
//! one recomputed in-circuit from the same answers MUST agree, otherwise proof generation fails
//! on an unsatisfied witness.

use crate::constants::MAX_GRADE;
use crate::error::CredentialError;
use crate::types::{
    open_answer_hash, padded_multiple_choice_answers, root_from_leaves, GradeResult, TestAnswers,
    TestConfig,
};

/// Grade `answers` and decide pass/fail. The config is validated first.
pub fn grade(answers: &TestAnswers, config: &TestConfig) -> Result<GradeResult, CredentialError> {
    config.validate()?;
    check_answers(answers, config)?;

    let multiple_choice = multiple_choice_contribution(answers, config);
    let (open_answer_results, n_correct) = open_answer_results(answers, config);
    let open = open_answers_contribution(
        n_correct,
        config.n_questions,
        config.answer_slots(),
        config.multiple_choice_weight,
    );

    let grade = multiple_choice + open;
    let weight = config.multiple_choice_weight;

    Ok(GradeResult {
        grade,
        minimum_grade: config.minimum_grade,
        pass: grade >= config.minimum_grade,
        n_questions: answers.open_answers.len(),
        multiple_choice_grade: if weight == 0 {
            0.0
        } else {
            100.0 * f64::from(multiple_choice) / f64::from(weight)
        },
        open_answer_grade: if weight == MAX_GRADE {
            0.0
        } else {
            100.0 * f64::from(open) / f64::from(MAX_GRADE - weight)
        },
        multiple_choice_weight: weight,
        open_answer_results,
    })
}

/// Answer-count preconditions, checked before any hashing.
pub fn check_answers(answers: &TestAnswers, config: &TestConfig) -> Result<(), CredentialError> {
    if answers.multiple_choice_answers.len() > config.answer_slots() {
        return Err(CredentialError::validation(
            "surpassed maximum number of answers for a test",
        ));
    }
    let n_questions = usize::from(config.n_questions);
    if config.multiple_choice_weight != MAX_GRADE && answers.open_answers.len() < n_questions {
        return Err(CredentialError::validation("some questions were left unanswered"));
    }
    if answers.open_answers.len() > n_questions {
        return Err(CredentialError::validation(format!(
            "answered {} questions while the test only has {}",
            answers.open_answers.len(),
            n_questions
        )));
    }
    Ok(())
}

/// All or nothing: the padded answer vector must hash to the published key root.
fn multiple_choice_contribution(answers: &TestAnswers, config: &TestConfig) -> u8 {
    let padded = padded_multiple_choice_answers(&answers.multiple_choice_answers, config.test_height);
    if root_from_leaves(&padded) == config.multiple_choice_root {
        config.multiple_choice_weight
    } else {
        0
    }
}

/// Per-question correctness of the submitted answers, and the number of correct slots out of
/// `2^test_height` (unsubmitted slots hold the empty answer and always count as correct).
fn open_answer_results(answers: &TestAnswers, config: &TestConfig) -> (Vec<bool>, usize) {
    let results: Vec<bool> = answers
        .open_answers
        .iter()
        .zip(&config.open_answers_hashes)
        .map(|(answer, expected)| open_answer_hash(answer) == *expected)
        .collect();

    let correct = results.iter().filter(|ok| **ok).count();
    let padding = config.answer_slots() - answers.open_answers.len();
    (results, correct + padding)
}

/// `floor((100 - weight) * (nCorrect + nQuestions - 2^h) / nQuestions)`, or 0 when the
/// bracketed term is not positive or the test has no open questions.
pub fn open_answers_contribution(
    n_correct: usize,
    n_questions: u8,
    answer_slots: usize,
    multiple_choice_weight: u8,
) -> u8 {
    let n_questions = usize::from(n_questions);
    if n_questions == 0 || n_correct + n_questions <= answer_slots {
        return 0;
    }
    let open_weight = usize::from(MAX_GRADE.saturating_sub(multiple_choice_weight));
    let score = open_weight * (n_correct + n_questions - answer_slots) / n_questions;
    // n_correct never exceeds answer_slots, so score <= open_weight <= 100.
    score.min(usize::from(MAX_GRADE)) as u8
}
