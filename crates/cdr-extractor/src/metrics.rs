//! Quality Metrics module
//!
//! Precision, recall and F1 of predicted entities and CID relations against
//! annotated documents. Every ratio is 0 when its denominator is 0.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use cdr_core::{AnnotatedDocument, JointAnnotation, Relation, Segment};

use crate::mesh::MeshResolver;

/// correct / predicted, 0 when nothing was predicted
pub fn precision(correct: usize, predicted: usize) -> f64 {
    if predicted == 0 {
        0.0
    } else {
        correct as f64 / predicted as f64
    }
}

/// correct / gold, 0 when there is no gold
pub fn recall(correct: usize, gold: usize) -> f64 {
    if gold == 0 {
        0.0
    } else {
        correct as f64 / gold as f64
    }
}

/// Weighted harmonic mean of precision and recall
pub fn f_measure(precision: f64, recall: f64, beta: f64) -> f64 {
    let beta2 = beta * beta;
    let denominator = beta2 * precision + recall;
    if denominator == 0.0 {
        0.0
    } else {
        (1.0 + beta2) * precision * recall / denominator
    }
}

// ============================================================================
// Counts
// ============================================================================

/// Match counts for one kind of prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    /// Predictions that match gold
    pub correct: usize,
    /// Total predictions
    pub predicted: usize,
    /// Total gold items
    pub gold: usize,
}

impl ExtractionMetrics {
    pub fn precision(&self) -> f64 {
        precision(self.correct, self.predicted)
    }

    pub fn recall(&self) -> f64 {
        recall(self.correct, self.gold)
    }

    pub fn f1_score(&self) -> f64 {
        f_measure(self.precision(), self.recall(), 1.0)
    }

    pub fn false_positives(&self) -> usize {
        self.predicted - self.correct
    }

    pub fn false_negatives(&self) -> usize {
        self.gold - self.correct
    }

    pub fn add(&mut self, other: &ExtractionMetrics) {
        self.correct += other.correct;
        self.predicted += other.predicted;
        self.gold += other.gold;
    }
}

/// Entity and relation counts of one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub entities: ExtractionMetrics,
    pub relations: ExtractionMetrics,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Scores decoded sentences against their annotated document
///
/// Predicted entities get identifiers from the resolver; those that stay
/// unresolved are dropped from both the entity and the relation counts.
pub struct Evaluator<'a> {
    resolver: &'a dyn MeshResolver,
}

impl<'a> Evaluator<'a> {
    pub fn new(resolver: &'a dyn MeshResolver) -> Self {
        Self { resolver }
    }

    fn resolve(&self, annotation: &JointAnnotation) -> JointAnnotation {
        let segments = annotation
            .segments
            .iter()
            .cloned()
            .map(|mut segment: Segment| {
                if segment.is_entity() && segment.mesh.is_none() {
                    segment.mesh = self.resolver.resolve(&segment.text);
                }
                segment
            })
            .collect();
        JointAnnotation {
            segments,
            relations: annotation.relations.clone(),
        }
    }

    /// Compare the decoded sentences of `document` with its gold annotations
    pub fn evaluate_document(
        &self,
        document: &AnnotatedDocument,
        predictions: &[JointAnnotation],
    ) -> DocumentMetrics {
        let resolved: Vec<JointAnnotation> = predictions.iter().map(|p| self.resolve(p)).collect();

        let predicted_entities: Vec<&Segment> = resolved
            .iter()
            .flat_map(|a| a.entities())
            .filter(|s| s.mesh.is_some())
            .collect();

        // one-to-one match on (type, offset, text)
        let mut matched_gold: HashSet<usize> = HashSet::new();
        for predicted in &predicted_entities {
            let hit = document.entities.iter().enumerate().find(|(idx, gold)| {
                !matched_gold.contains(idx)
                    && gold.entity_type == predicted.entity_type
                    && gold.offset == predicted.offset
                    && gold.text == predicted.text
            });
            if let Some((idx, _)) = hit {
                matched_gold.insert(idx);
            }
        }

        let predicted_relations: HashSet<Relation> = resolved
            .iter()
            .flat_map(|a| a.resolved_relations())
            .collect();
        let correct_relations = predicted_relations.intersection(&document.relations).count();

        DocumentMetrics {
            entities: ExtractionMetrics {
                correct: matched_gold.len(),
                predicted: predicted_entities.len(),
                gold: document.entities.len(),
            },
            relations: ExtractionMetrics {
                correct: correct_relations,
                predicted: predicted_relations.len(),
                gold: document.relations.len(),
            },
        }
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Micro-averaged counts over a document set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub entity_metrics: ExtractionMetrics,
    pub relation_metrics: ExtractionMetrics,
    pub num_documents: usize,
}

impl AggregateMetrics {
    pub fn add(&mut self, document: &DocumentMetrics) {
        self.entity_metrics.add(&document.entities);
        self.relation_metrics.add(&document.relations);
        self.num_documents += 1;
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let section = |title: &str, m: &ExtractionMetrics| {
            format!(
                "{title}:\n\
                   Precision: {:.1}%\n\
                   Recall:    {:.1}%\n\
                   F1 Score:  {:.1}%\n\
                   Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n",
                m.precision() * 100.0,
                m.recall() * 100.0,
                m.f1_score() * 100.0,
                m.gold,
                m.predicted,
                m.correct,
                m.false_positives(),
                m.false_negatives(),
            )
        };
        format!(
            "=== Extraction Quality Report ===\n\n\
             Documents evaluated: {}\n\n{}\n{}",
            self.num_documents,
            section("Entity Extraction", &self.entity_metrics),
            section("Relation Extraction (CID)", &self.relation_metrics),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshDictionary, NullResolver};
    use cdr_core::{EntityType, GoldEntity, RelationEntity, RelationType, Sentence};

    fn document() -> AnnotatedDocument {
        AnnotatedDocument::new("1", "Aspirin causes headache .", "")
            .with_entity(GoldEntity::new(0, "Aspirin", EntityType::Chemical).with_mesh("C1"))
            .with_entity(GoldEntity::new(15, "headache", EntityType::Disease).with_mesh("D1"))
            .with_relation(Relation::new(RelationType::Cid, "C1", "D1"))
    }

    fn prediction(types: [EntityType; 4], link: bool) -> JointAnnotation {
        let sentence = Sentence::from_words(0, &["Aspirin", "causes", "headache", "."]);
        let segments = sentence
            .tokens
            .iter()
            .zip(types)
            .map(|(t, ty)| Segment::from_token(t, ty))
            .collect();
        let relations = if link {
            vec![RelationEntity::new(RelationType::Cid, 2, 0)]
        } else {
            vec![]
        };
        JointAnnotation {
            segments,
            relations,
        }
    }

    fn dictionary() -> MeshDictionary {
        MeshDictionary::from_documents(&[document()])
    }

    #[test]
    fn test_zero_denominators() {
        assert_eq!(precision(0, 0), 0.0);
        assert_eq!(recall(0, 0), 0.0);
        assert_eq!(f_measure(0.0, 0.0, 1.0), 0.0);

        let empty = ExtractionMetrics::default();
        assert_eq!(empty.f1_score(), 0.0);
        assert!(!empty.f1_score().is_nan());
    }

    #[test]
    fn test_f_measure() {
        assert!((f_measure(0.5, 1.0, 1.0) - 2.0 / 3.0).abs() < 1e-12);
        assert!((f_measure(0.8, 0.8, 1.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_prediction() {
        let dictionary = dictionary();
        let evaluator = Evaluator::new(&dictionary);
        let predicted = prediction(
            [
                EntityType::Chemical,
                EntityType::Empty,
                EntityType::Disease,
                EntityType::Empty,
            ],
            true,
        );

        let metrics = evaluator.evaluate_document(&document(), &[predicted]);
        assert_eq!(metrics.entities.precision(), 1.0);
        assert_eq!(metrics.entities.recall(), 1.0);
        assert_eq!(metrics.relations.f1_score(), 1.0);
    }

    #[test]
    fn test_unresolved_entities_are_dropped() {
        let evaluator = Evaluator::new(&NullResolver);
        let predicted = prediction(
            [
                EntityType::Chemical,
                EntityType::Empty,
                EntityType::Disease,
                EntityType::Empty,
            ],
            true,
        );

        let metrics = evaluator.evaluate_document(&document(), &[predicted]);
        assert_eq!(metrics.entities.predicted, 0);
        assert_eq!(metrics.entities.gold, 2);
        assert_eq!(metrics.relations.predicted, 0);
        assert_eq!(metrics.relations.recall(), 0.0);
    }

    #[test]
    fn test_wrong_type_is_not_a_match() {
        let dictionary = dictionary();
        let evaluator = Evaluator::new(&dictionary);
        let predicted = prediction(
            [
                EntityType::Disease,
                EntityType::Empty,
                EntityType::Disease,
                EntityType::Empty,
            ],
            false,
        );

        let metrics = evaluator.evaluate_document(&document(), &[predicted]);
        assert_eq!(metrics.entities.correct, 1);
        assert_eq!(metrics.entities.predicted, 2);
        assert_eq!(metrics.relations.predicted, 0);
        assert_eq!(metrics.relations.gold, 1);
    }

    #[test]
    fn test_duplicate_relations_collapse() {
        let dictionary = dictionary();
        let evaluator = Evaluator::new(&dictionary);
        let linked = prediction(
            [
                EntityType::Chemical,
                EntityType::Empty,
                EntityType::Disease,
                EntityType::Empty,
            ],
            true,
        );

        // the same sentence decoded twice states CID(C1, D1) twice
        let metrics = evaluator.evaluate_document(&document(), &[linked.clone(), linked]);
        assert_eq!(metrics.relations.predicted, 1);
        assert_eq!(metrics.relations.correct, 1);
    }

    #[test]
    fn test_aggregate_report() {
        let mut aggregate = AggregateMetrics::default();
        aggregate.add(&DocumentMetrics {
            entities: ExtractionMetrics {
                correct: 8,
                predicted: 10,
                gold: 10,
            },
            relations: ExtractionMetrics::default(),
        });
        aggregate.add(&DocumentMetrics::default());

        assert_eq!(aggregate.num_documents, 2);
        assert!((aggregate.entity_metrics.precision() - 0.8).abs() < 1e-12);

        let report = aggregate.report();
        assert!(report.contains("Documents evaluated: 2"));
        assert!(report.contains("Entity Extraction:"));
        assert!(report.contains("Relation Extraction (CID):"));
    }
}
