pub fn l2_norm(v: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for x in v {
        sum += x * x;
    }
    sum.sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    (dot(a, b) / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_is_clamped_for_parallel_vectors() {
        let a = [3.0f32, 4.0];
        let n = l2_norm(&a);
        assert_eq!(n, 5.0);
        assert!(cosine_similarity(&a, &a, n, n) <= 1.0);
        assert_eq!(dot(&a, &[-3.0, -4.0]), -25.0);
    }
}
