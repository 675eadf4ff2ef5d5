use arrow::array::StructArray;

pub trait StatTraceBuilder<T: ?Sized>: Send {
    fn append_value(&mut self, value: &T);
    fn finalize(self) -> Option<StructArray>;
    fn inspect(&self) -> Option<StructArray>;
}

impl<T> StatTraceBuilder<T> for () {
    fn append_value(&mut self, _value: &T) {}

    fn finalize(self) -> Option<StructArray> {
        None
    }

    fn inspect(&self) -> Option<StructArray> {
        None
    }
}
