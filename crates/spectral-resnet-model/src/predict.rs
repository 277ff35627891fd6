use serde::{Deserialize, Serialize};
use spectral_resnet_core::{Float, Tensor, TensorError, TensorResult};

/// ESC-50 category names, indexed by class target.
pub const ESC50_CLASSES: [&str; 50] = [
    "dog", "rooster", "pig", "cow", "frog",
    "cat", "hen", "insects", "sheep", "crow",
    "rain", "sea_waves", "crackling_fire", "crickets", "chirping_birds",
    "water_drops", "wind", "pouring_water", "toilet_flush", "thunderstorm",
    "crying_baby", "sneezing", "clapping", "breathing", "coughing",
    "footsteps", "laughing", "brushing_teeth", "snoring", "drinking_sipping",
    "door_wood_knock", "mouse_click", "keyboard_typing", "door_wood_creaks", "can_opening",
    "washing_machine", "vacuum_cleaner", "clock_alarm", "clock_tick", "glass_breaking",
    "helicopter", "chainsaw", "siren", "car_horn", "engine",
    "train", "church_bells", "airplane", "fireworks", "hand_saw",
];

/// One labelled class probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f64,
}

fn rows_and_classes<T: Float>(logits: &Tensor<T>) -> TensorResult<(usize, usize)> {
    match logits.shape().dims() {
        &[rows, classes] => Ok((rows, classes)),
        _ => Err(TensorError::DimensionMismatch(format!(
            "expected [batch, classes] logits, got shape {}",
            logits.shape()
        ))),
    }
}

/// Row-wise softmax of `[batch, classes]` logits. The row maximum is
/// subtracted first, so large logits do not overflow.
pub fn softmax<T: Float>(logits: &Tensor<T>) -> TensorResult<Tensor<T>> {
    let (_, classes) = rows_and_classes(logits)?;
    let mut probs = logits.clone();
    for row in probs.data_mut().chunks_mut(classes.max(1)) {
        let max = row.iter().map(|v| v.to_f64()).fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = row.iter().map(|v| (v.to_f64() - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        for (v, e) in row.iter_mut().zip(exps) {
            *v = T::from_f64(e / total);
        }
    }
    Ok(probs)
}

/// The `k` most probable classes of every batch row, most confident first.
///
/// `labels` names the columns of `logits`; `k` larger than the class count
/// returns every class.
pub fn top_k<T: Float>(logits: &Tensor<T>, labels: &[&str], k: usize) -> TensorResult<Vec<Vec<Prediction>>> {
    let (rows, classes) = rows_and_classes(logits)?;
    if labels.len() != classes {
        return Err(TensorError::ShapeMismatch {
            expected: vec![classes],
            got: vec![labels.len()],
        });
    }
    let probs = softmax(logits)?;

    let mut predictions = Vec::with_capacity(rows);
    for row in 0..rows {
        let row_probs = &probs.data()[row * classes..(row + 1) * classes];
        let mut order: Vec<usize> = (0..classes).collect();
        // Stable, so ties keep class order.
        order.sort_by(|&a, &b| {
            row_probs[b]
                .partial_cmp(&row_probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.push(
            order
                .into_iter()
                .take(k)
                .map(|c| Prediction {
                    class: labels[c].to_string(),
                    confidence: row_probs[c].to_f64(),
                })
                .collect(),
        );
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 1000.0, 1000.0, 0.0], vec![2, 3]).unwrap();
        let probs = softmax(&logits).unwrap();
        assert_eq!(probs.shape_vec(), vec![2, 3]);
        assert!(probs.all_finite());
        for row in probs.data().chunks(3) {
            assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
        // e^1 / (e^1 + e^2 + e^3)
        assert_abs_diff_eq!(probs.data()[0], 0.09003057317038046, epsilon = 1e-12);
        assert_abs_diff_eq!(probs.data()[3], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_top_k_orders_by_confidence() {
        let logits: Tensor<f32> = Tensor::new(vec![0.0, 3.0, 1.0, 2.0], vec![1, 4]).unwrap();
        let preds = top_k(&logits, &["a", "b", "c", "d"], 3).unwrap();
        assert_eq!(preds.len(), 1);
        let classes: Vec<&str> = preds[0].iter().map(|p| p.class.as_str()).collect();
        assert_eq!(classes, vec!["b", "d", "c"]);
        assert!(preds[0].windows(2).all(|w| w[0].confidence >= w[1].confidence));

        let all = top_k(&logits, &["a", "b", "c", "d"], 10).unwrap();
        assert_eq!(all[0].len(), 4);
        assert_abs_diff_eq!(all[0].iter().map(|p| p.confidence).sum::<f64>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_top_k_ties_keep_class_order() {
        let logits: Tensor<f64> = Tensor::zeros(vec![2, 3]);
        let preds = top_k(&logits, &["x", "y", "z"], 2).unwrap();
        for row in &preds {
            assert_eq!(row[0].class, "x");
            assert_eq!(row[1].class, "y");
            assert_abs_diff_eq!(row[0].confidence, 1.0 / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_top_k_rejects_bad_input() {
        let logits: Tensor<f32> = Tensor::zeros(vec![1, 3]);
        assert!(matches!(
            top_k(&logits, &["a", "b"], 1),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(top_k(&Tensor::<f32>::zeros(vec![3]), &["a", "b", "c"], 1).is_err());
    }

    #[test]
    fn test_prediction_json_fields() {
        let p = Prediction { class: "dog".into(), confidence: 0.75 };
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"class":"dog","confidence":0.75}"#);
        assert_eq!(ESC50_CLASSES.len(), 50);
        assert_eq!(ESC50_CLASSES[0], "dog");
        assert_eq!(ESC50_CLASSES[49], "hand_saw");
    }
}
