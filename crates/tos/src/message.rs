use std::any::Any;
use std::fmt;

/// Owned, type-erased payload carried by `send`, `message` and replies.
///
/// A message moves from sender to receiver exactly once.
pub struct Message {
    payload: Option<Box<dyn Any + Send>>,
}

impl Message {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            payload: Some(Box::new(value)),
        }
    }

    /// A message without payload, used for pure notifications.
    pub fn empty() -> Self {
        Self { payload: None }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.payload.as_ref().is_some_and(|p| p.is::<T>())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Takes the payload out as `T`, handing the message back unchanged on a
    /// type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.payload {
            Some(payload) => match payload.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(payload) => Err(Self {
                    payload: Some(payload),
                }),
            },
            None => Err(self),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Message(empty)")
        } else {
            f.write_str("Message(..)")
        }
    }
}
