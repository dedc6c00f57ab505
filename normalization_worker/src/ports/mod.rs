pub mod callback_notifier;
pub mod object_store;
