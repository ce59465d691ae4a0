use crate::common::*;

/// Summed negative log-likelihood of the target classes under `prob`.
pub fn cross_entropy(prob: &Tensor, targets: &Tensor) -> Fallible<Tensor> {
    let targets = check_targets(prob, targets)?;
    let target_prob = prob.gather(1, &targets.reshape(&[-1, 1]), false);
    Ok(-target_prob.log().sum(Kind::Float))
}

/// Fraction of examples whose most probable class is the target class.
pub fn accuracy(prob: &Tensor, targets: &Tensor) -> Fallible<Tensor> {
    let targets = check_targets(prob, targets)?;
    let correct = (predictions(prob) - targets).eq(0_i64);
    Ok(correct.to_kind(Kind::Float).mean(Kind::Float))
}

/// Most probable class per example.
pub fn predictions(prob: &Tensor) -> Tensor {
    let (_, classes) = prob.max_dim(1, false);
    classes
}

fn check_targets(prob: &Tensor, targets: &Tensor) -> Fallible<Tensor> {
    let (batch_size, num_classes) = match prob.size().as_slice() {
        &[batch_size, num_classes] => (batch_size, num_classes),
        other => bail!("expect (batch, classes) probabilities, got shape {:?}", other),
    };
    ensure!(batch_size > 0, "empty batch");
    ensure!(
        matches!(targets.kind(), Kind::Int64 | Kind::Int),
        "target classes must be integers, got {:?}",
        targets.kind()
    );
    ensure!(
        targets.size() == [batch_size],
        "expect {} target classes, got shape {:?}",
        batch_size,
        targets.size()
    );

    let targets = targets.to_kind(Kind::Int64).to_device(prob.device());
    let min_class = targets.min().int64_value(&[]);
    let max_class = targets.max().int64_value(&[]);
    ensure!(
        min_class >= 0 && max_class < num_classes,
        "target classes must lie in [0, {}), got values in [{}, {}]",
        num_classes,
        min_class,
        max_class
    );

    Ok(targets)
}
