/// Accessory side of the bridge.
///
/// `push_state` is called from inside the bridge's serialized context after
/// every confirmed change, rollback and drift correction. Implementations
/// must hand the value off and return without waiting on the accessory
/// transport.
pub trait AccessoryPort: Send + Sync + 'static {
    fn push_state(&self, on: bool);
}
