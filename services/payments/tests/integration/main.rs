
mod bulk_check_test;
mod db_test;
mod entitlement_test;
mod outbox_test;
mod router_test;
mod webhook_test;
