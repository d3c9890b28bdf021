#[cfg(test)]
mod horizontal_adapter_helpers;

#[cfg(test)]
mod horizontal_adapter_base_test;

#[cfg(test)]
mod horizontal_adapter_failure_tests;
