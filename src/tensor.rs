// Tensor dicts handed to the training side

use ahash::AHashMap;
use ndarray::Array3;

/// Key → tensor mapping, one per input, output and weighting set.
pub type TensorDict<T> = AHashMap<String, T>;

/// Processed `[C, H, W]` fields keyed like the tensors they become.
pub type FieldMap = TensorDict<Array3<f32>>;

/// Converts processed fields into whatever tensor type the caller trains with.
pub trait TensorConverter {
    type Tensor;

    fn convert(&self, field: Array3<f32>) -> Self::Tensor;

    fn to_tensor_dict(&self, fields: FieldMap) -> TensorDict<Self::Tensor> {
        fields
            .into_iter()
            .map(|(key, field)| (key, self.convert(field)))
            .collect()
    }
}

/// Keeps fields as `ndarray` arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayTensors;

impl TensorConverter for ArrayTensors {
    type Tensor = Array3<f32>;

    fn convert(&self, field: Array3<f32>) -> Array3<f32> {
        field
    }
}

/// A row-major buffer with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// Flattens fields for frameworks that build tensors from `(Vec, shape)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatTensors;

impl TensorConverter for FlatTensors {
    type Tensor = FlatTensor;

    fn convert(&self, field: Array3<f32>) -> FlatTensor {
        FlatTensor {
            shape: field.shape().to_vec(),
            // logical order; cropped fields are not contiguous
            data: field.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn flat_tensor_is_row_major_after_crop() {
        let field = Array3::from_shape_fn((2, 3, 3), |(c, h, w)| (c * 100 + h * 10 + w) as f32);
        let cropped = field.slice_move(s![.., ..2, ..2]);
        let t = FlatTensors.convert(cropped);
        assert_eq!(t.shape, vec![2, 2, 2]);
        assert_eq!(t.data, vec![0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0]);
    }

    #[test]
    fn dict_keeps_keys() {
        let mut fields = FieldMap::default();
        fields.insert("x_t0".into(), Array3::zeros((1, 2, 2)));
        fields.insert("x_t6".into(), Array3::ones((1, 2, 2)));
        let dict = ArrayTensors.to_tensor_dict(fields);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict["x_t6"].sum(), 4.0);
    }
}
